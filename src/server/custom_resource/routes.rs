use axum::{routing::post, Router};

use super::handlers;
use crate::server::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/invocations", post(handlers::invoke))
}
