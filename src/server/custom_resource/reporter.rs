use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::models::{CompletionResponse, CompletionStatus, ResourceRequest};
use super::reconciler::ReconcileOutcome;

/// Keeps the response document well under the orchestrator's 4 KiB limit
const MAX_REASON_LEN: usize = 1024;

/// Delivers the terminal response document for an invocation
#[async_trait]
pub trait CompletionReporter: Send + Sync {
    async fn send(&self, response_url: &str, response: &CompletionResponse) -> Result<()>;
}

/// Uploads the response document to the pre-signed `ResponseURL`
pub struct HttpCompletionReporter {
    client: reqwest::Client,
}

impl HttpCompletionReporter {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for completion reports")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CompletionReporter for HttpCompletionReporter {
    async fn send(&self, response_url: &str, response: &CompletionResponse) -> Result<()> {
        let body =
            serde_json::to_vec(response).context("Failed to serialize completion response")?;

        // The pre-signed URL is signed without a content type
        self.client
            .put(response_url)
            .header(CONTENT_TYPE, "")
            .body(body)
            .send()
            .await
            .context("Failed to send completion response")?
            .error_for_status()
            .context("Completion endpoint rejected the response")?;

        Ok(())
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ReconcileOutcome),
    Failure(String),
}

struct Pending {
    reporter: Arc<dyn CompletionReporter>,
    request: ResourceRequest,
}

impl Pending {
    fn response(&self, outcome: Outcome) -> CompletionResponse {
        let request = &self.request;
        let (status, reason, physical_resource_id, data) = match outcome {
            Outcome::Success(outcome) => (
                CompletionStatus::Success,
                None,
                outcome.physical_resource_id,
                outcome.data,
            ),
            Outcome::Failure(reason) => (
                CompletionStatus::Failed,
                Some(truncate_reason(reason)),
                None,
                BTreeMap::new(),
            ),
        };

        CompletionResponse {
            status,
            reason,
            physical_resource_id: physical_resource_id
                .or_else(|| request.physical_resource_id.clone())
                .unwrap_or_else(|| request.logical_resource_id.clone()),
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data,
        }
    }

    async fn send(self, response: &CompletionResponse) -> Result<()> {
        tracing::info!(
            request_id = %response.request_id,
            status = ?response.status,
            physical_resource_id = %response.physical_resource_id,
            "Reporting completion"
        );
        self.reporter
            .send(&self.request.response_url, response)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    request_id = %response.request_id,
                    error = ?e,
                    "Failed to deliver completion response"
                );
            })
    }
}

/// Obligation to report exactly one completion for an invocation
///
/// Created before reconciling and consumed by [`Completion::finish`], so a
/// second report cannot be expressed. Dropping an unfinished guard (for example
/// when the invocation future is cancelled) still dispatches a failure report.
pub struct Completion {
    pending: Option<Pending>,
}

impl Completion {
    pub fn begin(request: &ResourceRequest, reporter: Arc<dyn CompletionReporter>) -> Self {
        Self {
            pending: Some(Pending {
                reporter,
                request: request.clone(),
            }),
        }
    }

    /// Send the terminal report and return the delivered document
    ///
    /// The upload runs on its own task, so cancelling the caller while the
    /// report is in flight does not abort it.
    pub async fn finish(mut self, outcome: Outcome) -> Result<CompletionResponse> {
        let Some(pending) = self.pending.take() else {
            anyhow::bail!("completion already reported");
        };
        let response = pending.response(outcome);

        let delivery = {
            let response = response.clone();
            tokio::spawn(async move { pending.send(&response).await })
        };
        delivery.await.context("Completion report task failed")??;

        Ok(response)
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let response = pending.response(Outcome::Failure(
            "Invocation ended before the reconciler finished".to_string(),
        ));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    request_id = %response.request_id,
                    "Completion guard dropped unfinished, reporting failure"
                );
                handle.spawn(async move {
                    let _ = pending.send(&response).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    request_id = %response.request_id,
                    "Completion guard dropped outside a runtime, failure could not be reported"
                );
            }
        }
    }
}

/// Render an error and its sources on one line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn truncate_reason(reason: String) -> String {
    if reason.len() <= MAX_REASON_LEN {
        return reason;
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &reason[..end])
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Reporter that records every response it is asked to deliver
    #[derive(Default)]
    pub struct RecordingReporter {
        sent: Mutex<Vec<(String, CompletionResponse)>>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl RecordingReporter {
        /// Each delivery completes only after `delay`
        pub fn delayed(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<CompletionResponse> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, response)| response.clone())
                .collect()
        }

        pub fn urls(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CompletionReporter for RecordingReporter {
        async fn send(&self, response_url: &str, response: &CompletionResponse) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.sent
                .lock()
                .unwrap()
                .push((response_url.to_string(), response.clone()));
            if self.fail {
                anyhow::bail!("injected delivery failure");
            }
            Ok(())
        }
    }
}
