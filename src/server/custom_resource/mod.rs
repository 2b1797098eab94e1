mod error;
pub mod handlers;
mod invocation;
pub mod models;
mod reconciler;
mod reporter;
pub mod routes;
mod waiter;

pub use invocation::InvocationHandler;
pub use reconciler::Reconciler;
pub use reporter::HttpCompletionReporter;
pub use waiter::WaitPolicy;
