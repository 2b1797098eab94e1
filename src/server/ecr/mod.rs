mod manager;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use manager::EcrRepoManager;
pub use store::{Repository, RepositoryStore, StoreError};
