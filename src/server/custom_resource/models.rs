use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::ReconcileError;

/// Lifecycle operation requested by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Parse the wire `RequestType`; anything outside Create/Update/Delete is rejected
    pub fn parse(request_type: &str) -> Result<Self, ReconcileError> {
        match request_type {
            "Create" => Ok(Operation::Create),
            "Update" => Ok(Operation::Update),
            "Delete" => Ok(Operation::Delete),
            other => Err(ReconcileError::UnrecognizedOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "Create"),
            Operation::Update => write!(f, "Update"),
            Operation::Delete => write!(f, "Delete"),
        }
    }
}

/// Whether a lifecycle transition keeps the underlying repository
///
/// Only the literal value `Retain` retains; a missing flag or any other value does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Retain,
    Discard,
}

impl Retention {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("Retain") => Retention::Retain,
            _ => Retention::Discard,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecyclePolicy {
    #[serde(default)]
    pub lifecycle_policy_text: Option<String>,
}

/// Desired state of the repository as declared in the template
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryProperties {
    #[serde(default)]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub lifecycle_policy: Option<LifecyclePolicy>,
    #[serde(default)]
    pub delete_policy: Option<String>,
    #[serde(default)]
    pub update_replace_policy: Option<String>,
    /// Orchestrator-provided token naming the handler; not used by the reconciler
    #[serde(default)]
    pub service_token: Option<String>,
}

impl RepositoryProperties {
    /// Lifecycle policy text, treating an empty document as absent
    pub fn lifecycle_policy_text(&self) -> Option<&str> {
        self.lifecycle_policy
            .as_ref()
            .and_then(|policy| policy.lifecycle_policy_text.as_deref())
            .filter(|text| !text.trim().is_empty())
    }

    pub fn delete_retention(&self) -> Retention {
        Retention::from_flag(self.delete_policy.as_deref())
    }

    pub fn update_replace_retention(&self) -> Retention {
        Retention::from_flag(self.update_replace_policy.as_deref())
    }
}

/// One custom resource invocation as delivered by the orchestrator
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRequest {
    /// Kept as a string so unknown request types reach the reconciler and get reported
    pub request_type: String,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: RepositoryProperties,
    #[serde(default)]
    pub old_resource_properties: Option<RepositoryProperties>,
}

impl ResourceRequest {
    pub fn repository_name(&self) -> Option<&str> {
        self.resource_properties
            .repository_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

/// Terminal status sent back to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Response document delivered to the request's `ResponseURL`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionResponse {
    pub status: CompletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}
