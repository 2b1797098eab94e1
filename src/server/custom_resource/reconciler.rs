use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::ReconcileError;
use super::models::{Operation, RepositoryProperties, ResourceRequest, Retention};
use super::waiter::{ConsistencyWaiter, WaitPolicy, WaitTarget};
use crate::server::ecr::{Repository, RepositoryStore, StoreError};

/// Result of a converged invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Repository name, when one is known for this invocation
    pub physical_resource_id: Option<String>,
    /// Attributes exposed to the template (`Fn::GetAtt`)
    pub data: BTreeMap<String, String>,
}

impl ReconcileOutcome {
    fn for_name(name: &str) -> Self {
        Self {
            physical_resource_id: Some(name.to_string()),
            data: BTreeMap::new(),
        }
    }

    fn for_repository(repository: &Repository) -> Self {
        let mut data = BTreeMap::new();
        data.insert("RepositoryName".to_string(), repository.name.clone());
        if !repository.arn.is_empty() {
            data.insert("Arn".to_string(), repository.arn.clone());
        }
        if !repository.uri.is_empty() {
            data.insert("RepositoryUri".to_string(), repository.uri.clone());
        }
        Self {
            physical_resource_id: Some(repository.name.clone()),
            data,
        }
    }
}

/// Converges an ECR repository toward the state requested by one invocation
///
/// The reconciler is stateless: every decision is taken from the request and a
/// fresh read of the store. It relies on idempotent store operations rather than
/// exclusive access, so repeated or overlapping invocations are tolerated.
///
/// | Operation | Retention | Action |
/// |-----------|-----------|--------|
/// | Create    | -         | create, wait until visible, apply lifecycle policy |
/// | Update    | Retain    | apply lifecycle policy only |
/// | Update    | other     | delete, wait until absent, then the Create path |
/// | Update, renamed | Retain | rejected unless already pointing at the new name |
/// | Update, renamed | other  | the Create path for the new name |
/// | Delete    | Retain    | leave the repository untouched |
/// | Delete    | other     | force delete, wait until absent |
pub struct Reconciler {
    store: Arc<dyn RepositoryStore>,
    waiter: ConsistencyWaiter,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RepositoryStore>, wait_policy: WaitPolicy) -> Self {
        let waiter = ConsistencyWaiter::new(Arc::clone(&store), wait_policy);
        Self { store, waiter }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.waiter.policy()
    }

    /// Reconcile a single invocation
    ///
    /// Unknown request types are rejected before any store call is made.
    pub async fn reconcile(
        &self,
        request: &ResourceRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let operation = Operation::parse(&request.request_type)?;
        let properties = &request.resource_properties;

        let Some(name) = request.repository_name() else {
            if operation == Operation::Delete {
                // A create that failed validation is followed by a delete with the
                // same properties; there is nothing to remove.
                info!(
                    request_id = %request.request_id,
                    "Delete without RepositoryName, nothing to remove"
                );
                return Ok(ReconcileOutcome::default());
            }
            return Err(ReconcileError::InvalidProperties(
                "RepositoryName is required".to_string(),
            ));
        };

        info!(
            request_id = %request.request_id,
            %operation,
            repository = %name,
            "Reconciling repository"
        );

        match operation {
            Operation::Create => self.create(name, properties).await,
            Operation::Update => {
                let renamed_from = request
                    .old_resource_properties
                    .as_ref()
                    .and_then(|old| old.repository_name.as_deref())
                    .filter(|old_name| *old_name != name);
                let current_id = request.physical_resource_id.as_deref();
                self.update(name, renamed_from, current_id, properties).await
            }
            Operation::Delete => self.delete(name, properties).await,
        }
    }

    async fn create(
        &self,
        name: &str,
        properties: &RepositoryProperties,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let repository = match self.store.create(name).await {
            Ok(repository) => {
                self.waiter.wait_until(name, WaitTarget::Exists).await?;
                Some(repository)
            }
            Err(StoreError::AlreadyExists(_)) => {
                info!(repository = %name, "Repository already exists, treating as converged");
                None
            }
            Err(e) => return Err(e.into()),
        };

        self.apply_lifecycle_policy(name, properties).await?;

        match repository {
            Some(repository) => Ok(ReconcileOutcome::for_repository(&repository)),
            None => self.describe_outcome(name).await,
        }
    }

    async fn update(
        &self,
        name: &str,
        renamed_from: Option<&str>,
        current_id: Option<&str>,
        properties: &RepositoryProperties,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let retention = properties.update_replace_retention();

        if let Some(old_name) = renamed_from {
            if retention == Retention::Retain && current_id != Some(name) {
                // A new physical id would make the orchestrator delete the old
                // repository through a plain Delete, which cannot see this policy.
                return Err(ReconcileError::InvalidProperties(format!(
                    "RepositoryName cannot change from '{}' to '{}' while UpdateReplacePolicy is Retain",
                    old_name, name
                )));
            }
            if retention == Retention::Discard {
                // The new physical id makes the orchestrator issue a Delete for the old one
                info!(
                    repository = %name,
                    old_repository = %old_name,
                    "Repository name changed, creating replacement"
                );
                return self.create(name, properties).await;
            }
        }

        match retention {
            Retention::Retain => {
                info!(repository = %name, "Retaining repository on update, refreshing lifecycle policy");
                self.apply_lifecycle_policy(name, properties).await?;
                self.describe_outcome(name).await
            }
            Retention::Discard => {
                info!(repository = %name, "Replacing repository");
                self.remove(name).await?;
                self.create(name, properties).await
            }
        }
    }

    async fn delete(
        &self,
        name: &str,
        properties: &RepositoryProperties,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if properties.delete_retention() == Retention::Retain {
            info!(repository = %name, "Retaining repository on delete");
            return Ok(ReconcileOutcome::for_name(name));
        }

        self.remove(name).await?;
        Ok(ReconcileOutcome::for_name(name))
    }

    /// Force delete and wait until the read path no longer sees the repository
    async fn remove(&self, name: &str) -> Result<(), ReconcileError> {
        match self.store.delete(name, true).await {
            Ok(()) => self.waiter.wait_until(name, WaitTarget::Absent).await,
            Err(StoreError::NotFound(_)) => {
                debug!(repository = %name, "Repository already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_lifecycle_policy(
        &self,
        name: &str,
        properties: &RepositoryProperties,
    ) -> Result<(), ReconcileError> {
        let Some(policy_text) = properties.lifecycle_policy_text() else {
            debug!(repository = %name, "No lifecycle policy provided");
            return Ok(());
        };

        self.store.put_lifecycle_policy(name, policy_text).await?;
        info!(repository = %name, "Applied lifecycle policy");
        Ok(())
    }

    async fn describe_outcome(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        Ok(match self.store.describe(name).await? {
            Some(repository) => ReconcileOutcome::for_repository(&repository),
            None => ReconcileOutcome::for_name(name),
        })
    }
}
