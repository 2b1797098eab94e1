use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a [`RepositoryStore`]
///
/// `AlreadyExists` and `NotFound` are distinguishable from every other failure so
/// callers can decide which conditions count as convergence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("repository '{0}' already exists")]
    AlreadyExists(String),

    #[error("repository '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Observable description of an image repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub arn: String,
    pub uri: String,
}

/// Thin client over the remote image repository service
///
/// Every call is a single remote request. Implementations never retry; bounded
/// polling and retry policy live in the waiter and reconciler above this trait.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Describe a repository, returning `None` when it does not exist
    async fn describe(&self, name: &str) -> Result<Option<Repository>, StoreError>;

    /// Create a repository
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the name is taken.
    async fn create(&self, name: &str) -> Result<Repository, StoreError>;

    /// Delete a repository; `force` also removes any images it still contains
    ///
    /// Fails with [`StoreError::NotFound`] when the repository is absent.
    async fn delete(&self, name: &str, force: bool) -> Result<(), StoreError>;

    /// Attach a lifecycle (retention) policy document to a repository
    ///
    /// Fails with [`StoreError::NotFound`] when the repository is absent.
    async fn put_lifecycle_policy(&self, name: &str, policy_text: &str)
        -> Result<(), StoreError>;

    /// Check whether a repository is currently visible on the read path
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.describe(name).await?.is_some())
    }
}
