use std::sync::Arc;

use anyhow::Result;

use crate::server::custom_resource::{HttpCompletionReporter, InvocationHandler, Reconciler};
use crate::server::ecr::EcrRepoManager;
use crate::server::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<InvocationHandler>,
}

impl AppState {
    pub fn new(handler: InvocationHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Wire the ECR store, reconciler and HTTP reporter from settings
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(build_handler(settings).await?))
    }
}

pub async fn build_handler(settings: &Settings) -> Result<InvocationHandler> {
    let store = Arc::new(EcrRepoManager::new(&settings.aws).await?);
    let reconciler = Reconciler::new(store, settings.waiter.policy());
    let reporter = Arc::new(HttpCompletionReporter::new(
        settings.handler.report_timeout(),
    )?);

    tracing::info!(
        poll_interval_secs = settings.waiter.poll_interval_secs,
        max_attempts = settings.waiter.max_attempts,
        max_wait_secs = reconciler.wait_policy().max_wait().as_secs(),
        timeout_secs = settings.handler.timeout_secs,
        "Invocation handler configured"
    );

    Ok(InvocationHandler::new(
        reconciler,
        reporter,
        settings.handler.timeout(),
    ))
}
