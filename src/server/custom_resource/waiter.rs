use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::ReconcileError;
use crate::server::ecr::RepositoryStore;

/// Observable repository state to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Exists,
    Absent,
}

impl WaitTarget {
    fn is_reached(self, exists: bool) -> bool {
        match self {
            WaitTarget::Exists => exists,
            WaitTarget::Absent => !exists,
        }
    }
}

impl fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitTarget::Exists => write!(f, "visible"),
            WaitTarget::Absent => write!(f, "absent"),
        }
    }
}

/// Polling bound for a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl WaitPolicy {
    /// Longest time a wait can block, excluding the probe calls themselves
    pub fn max_wait(&self) -> Duration {
        self.poll_interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 24,
        }
    }
}

/// Polls the store until a repository reaches the target state
///
/// Absorbs the lag between ECR's create/delete acknowledgement and the
/// describe read path. Each attempt is one `exists` probe; the waiter sleeps
/// `poll_interval` between attempts but not after the last one.
pub struct ConsistencyWaiter {
    store: Arc<dyn RepositoryStore>,
    policy: WaitPolicy,
}

impl ConsistencyWaiter {
    pub fn new(store: Arc<dyn RepositoryStore>, policy: WaitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub async fn wait_until(&self, name: &str, target: WaitTarget) -> Result<(), ReconcileError> {
        for attempt in 1..=self.policy.max_attempts {
            let exists = self.store.exists(name).await?;

            if target.is_reached(exists) {
                tracing::debug!(
                    repository = %name,
                    %target,
                    attempt,
                    "Repository reached target state"
                );
                return Ok(());
            }

            if attempt < self.policy.max_attempts {
                tracing::debug!(
                    repository = %name,
                    %target,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    "Repository not yet in target state, polling again"
                );
                tokio::time::sleep(self.policy.poll_interval).await;
            }
        }

        tracing::warn!(
            repository = %name,
            %target,
            attempts = self.policy.max_attempts,
            "Timed out waiting for repository state"
        );

        Err(ReconcileError::ConsistencyTimeout {
            name: name.to_string(),
            target,
            attempts: self.policy.max_attempts,
        })
    }
}
