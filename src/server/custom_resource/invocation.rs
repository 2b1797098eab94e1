use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tracing::{error, warn};

use super::models::{CompletionResponse, ResourceRequest};
use super::reconciler::Reconciler;
use super::reporter::{error_chain, Completion, CompletionReporter, Outcome};

/// Runs one invocation end to end: reconcile, then report exactly once
///
/// The completion guard is acquired before anything else happens, so every exit
/// path (success, reconcile error, panic, timeout, or cancellation of this
/// future) produces exactly one report.
pub struct InvocationHandler {
    reconciler: Reconciler,
    reporter: Arc<dyn CompletionReporter>,
    timeout: Duration,
}

impl InvocationHandler {
    pub fn new(
        reconciler: Reconciler,
        reporter: Arc<dyn CompletionReporter>,
        timeout: Duration,
    ) -> Self {
        Self {
            reconciler,
            reporter,
            timeout,
        }
    }

    /// Handle one invocation
    ///
    /// Returns the response document that was delivered. An error means the
    /// report itself could not be delivered; it is not retried here.
    pub async fn handle(&self, request: ResourceRequest) -> Result<CompletionResponse> {
        let completion = Completion::begin(&request, Arc::clone(&self.reporter));
        let outcome = self.run(&request).await;
        completion.finish(outcome).await
    }

    async fn run(&self, request: &ResourceRequest) -> Outcome {
        let reconcile = AssertUnwindSafe(self.reconciler.reconcile(request)).catch_unwind();

        match tokio::time::timeout(self.timeout, reconcile).await {
            Ok(Ok(Ok(outcome))) => Outcome::Success(outcome),
            Ok(Ok(Err(err))) => {
                warn!(
                    request_id = %request.request_id,
                    request_type = %request.request_type,
                    error = %err,
                    "Reconcile failed"
                );
                Outcome::Failure(error_chain(&err))
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(
                    request_id = %request.request_id,
                    panic = %message,
                    "Reconciler panicked"
                );
                Outcome::Failure(format!("Reconciler panicked: {}", message))
            }
            Err(_) => {
                error!(
                    request_id = %request.request_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Reconcile timed out"
                );
                Outcome::Failure(format!(
                    "Reconcile did not finish within {} seconds",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
