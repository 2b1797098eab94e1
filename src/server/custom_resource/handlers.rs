use axum::{body::Bytes, extract::State, Json};

use super::error::InvocationError;
use super::models::{CompletionResponse, ResourceRequest};
use crate::server::state::AppState;

/// Reconcile one custom resource request and report its completion
///
/// A body that does not parse as a request carries no usable `ResponseURL`, so
/// it is rejected here instead of being reported.
pub async fn invoke(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CompletionResponse>, InvocationError> {
    let request: ResourceRequest = serde_json::from_slice(&body)?;

    let request_id = request.request_id.clone();
    let response = state
        .handler
        .handle(request)
        .await
        .map_err(|source| InvocationError::ReportUndeliverable { request_id, source })?;

    Ok(Json(response))
}
