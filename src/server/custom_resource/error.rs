use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use super::waiter::WaitTarget;
use crate::server::ecr::StoreError;

/// Fatal conditions for a single invocation
///
/// Recoverable store conditions (an `AlreadyExists` on create, a `NotFound` on
/// delete) are absorbed by the reconciler and never reach this type.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unrecognized request type '{0}'")]
    UnrecognizedOperation(String),

    #[error("invalid resource properties: {0}")]
    InvalidProperties(String),

    #[error("repository '{name}' did not become {target} after {attempts} polls")]
    ConsistencyTimeout {
        name: String,
        target: WaitTarget,
        attempts: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why the invocation endpoint could not hand back a delivered response
///
/// Reconcile failures are not errors here: they are reported to the
/// orchestrator as a `FAILED` completion and returned with status 200.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The body is not a custom resource request, so there is no `ResponseURL` to report to
    #[error("invalid custom resource request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("failed to deliver completion response for request '{request_id}'")]
    ReportUndeliverable {
        request_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl InvocationError {
    pub fn status(&self) -> StatusCode {
        match self {
            InvocationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            InvocationError::ReportUndeliverable { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for InvocationError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            InvocationError::InvalidRequest(err) => {
                tracing::warn!(error = %err, "Rejected invocation body");
                json!({ "error": self.to_string() })
            }
            InvocationError::ReportUndeliverable { request_id, source } => {
                // The reporter already logged the delivery attempt
                tracing::error!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    error = ?source,
                    "Invocation finished without a delivered report"
                );
                json!({ "error": self.to_string(), "request_id": request_id })
            }
        };

        (status, Json(body)).into_response()
    }
}
