use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::Client as EcrClient;

use super::store::{Repository, RepositoryStore, StoreError};
use crate::server::settings::AwsSettings;

/// Tag attached to every repository created by the reconciler
const MANAGED_TAG_KEY: &str = "ecr-repo-reconciler:managed";

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
pub(crate) fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    // Pattern: message: Some("actual error message")
    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15;
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    // JSON response body
    if let Some(start) = debug_str.find("\"Message\":\"") {
        let start = start + 11;
        if let Some(end) = debug_str[start..].find('"') {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let mut end = 200;
        while !debug_str.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &debug_str[..end])
    } else {
        debug_str
    }
}

fn to_repository(repo: &aws_sdk_ecr::types::Repository, fallback_name: &str) -> Repository {
    Repository {
        name: repo
            .repository_name()
            .unwrap_or(fallback_name)
            .to_string(),
        arn: repo.repository_arn().unwrap_or_default().to_string(),
        uri: repo.repository_uri().unwrap_or_default().to_string(),
    }
}

/// ECR-backed repository store
///
/// Each method maps to exactly one ECR API call. Service errors that mean
/// "already exists" or "not found" are translated into the matching
/// [`StoreError`] variant; everything else becomes [`StoreError::Transport`].
pub struct EcrRepoManager {
    ecr_client: EcrClient,
}

impl EcrRepoManager {
    /// Create a new ECR repository manager from AWS settings
    pub async fn new(settings: &AwsSettings) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        // Empty strings come from unset ${VAR:-} substitutions
        if let Some(region) = settings.region.as_deref().filter(|r| !r.is_empty()) {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            // Use static credentials if provided, otherwise the default chain
            let creds =
                aws_sdk_ecr::config::Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(creds);
        }

        if let Some(endpoint_url) = settings.endpoint_url.as_deref().filter(|u| !u.is_empty()) {
            tracing::info!(endpoint_url = %endpoint_url, "Using custom ECR endpoint");
            loader = loader.endpoint_url(endpoint_url);
        }

        let aws_config = loader.load().await;

        Ok(Self {
            ecr_client: EcrClient::new(&aws_config),
        })
    }
}

#[async_trait]
impl RepositoryStore for EcrRepoManager {
    async fn describe(&self, name: &str) -> Result<Option<Repository>, StoreError> {
        match self
            .ecr_client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await
        {
            Ok(response) => Ok(response
                .repositories()
                .first()
                .map(|repo| to_repository(repo, name))),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_not_found_exception() {
                        return Ok(None);
                    }
                }
                Err(StoreError::Transport(anyhow::anyhow!(
                    "Failed to describe ECR repository '{}': {}",
                    name,
                    format_sdk_error(&err)
                )))
            }
        }
    }

    async fn create(&self, name: &str) -> Result<Repository, StoreError> {
        tracing::info!(repository = %name, "Creating ECR repository");

        let managed_tag = aws_sdk_ecr::types::Tag::builder()
            .key(MANAGED_TAG_KEY)
            .value("true")
            .build()
            .context("Failed to build managed tag")?;

        let response = self
            .ecr_client
            .create_repository()
            .repository_name(name)
            .tags(managed_tag)
            .image_scanning_configuration(
                aws_sdk_ecr::types::ImageScanningConfiguration::builder()
                    .scan_on_push(true)
                    .build(),
            )
            .send()
            .await
            .map_err(|err| {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_already_exists_exception() {
                        return StoreError::AlreadyExists(name.to_string());
                    }
                }
                StoreError::Transport(anyhow::anyhow!(
                    "Failed to create ECR repository '{}': {}",
                    name,
                    format_sdk_error(&err)
                ))
            })?;

        let repository = response
            .repository()
            .map(|repo| to_repository(repo, name))
            .unwrap_or_else(|| Repository {
                name: name.to_string(),
                arn: String::new(),
                uri: String::new(),
            });

        tracing::info!(repository = %name, arn = %repository.arn, "Created ECR repository");
        Ok(repository)
    }

    async fn delete(&self, name: &str, force: bool) -> Result<(), StoreError> {
        tracing::info!(repository = %name, force, "Deleting ECR repository");

        self.ecr_client
            .delete_repository()
            .repository_name(name)
            .force(force)
            .send()
            .await
            .map_err(|err| {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_not_found_exception() {
                        return StoreError::NotFound(name.to_string());
                    }
                }
                StoreError::Transport(anyhow::anyhow!(
                    "Failed to delete ECR repository '{}': {}",
                    name,
                    format_sdk_error(&err)
                ))
            })?;

        tracing::info!(repository = %name, "Deleted ECR repository");
        Ok(())
    }

    async fn put_lifecycle_policy(
        &self,
        name: &str,
        policy_text: &str,
    ) -> Result<(), StoreError> {
        tracing::debug!(repository = %name, "Putting lifecycle policy");

        self.ecr_client
            .put_lifecycle_policy()
            .repository_name(name)
            .lifecycle_policy_text(policy_text)
            .send()
            .await
            .map_err(|err| {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_not_found_exception() {
                        return StoreError::NotFound(name.to_string());
                    }
                }
                StoreError::Transport(anyhow::anyhow!(
                    "Failed to put lifecycle policy on ECR repository '{}': {}",
                    name,
                    format_sdk_error(&err)
                ))
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct FakeSdkError {
        message: Option<String>,
    }

    #[test]
    fn test_format_sdk_error_extracts_message() {
        let err = FakeSdkError {
            message: Some("The repository with name 'app' does not exist".to_string()),
        };
        assert_eq!(
            format_sdk_error(&err),
            "The repository with name 'app' does not exist"
        );
    }

    struct RawBody(&'static str);

    impl std::fmt::Debug for RawBody {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    #[test]
    fn test_format_sdk_error_extracts_json_message() {
        let err = RawBody(r#"{"__type":"RepositoryNotFoundException","Message":"gone"}"#);
        assert_eq!(format_sdk_error(&err), "gone");
    }

    #[test]
    fn test_format_sdk_error_truncates_long_output() {
        let err = "x".repeat(500);
        let formatted = format_sdk_error(&err);
        assert!(formatted.ends_with("..."));
        assert_eq!(formatted.len(), 203);
    }

    #[test]
    fn test_format_sdk_error_truncates_on_char_boundary() {
        // The opening quote of the Debug output puts 'é' across bytes 199..201
        let err = format!("{}é{}", "x".repeat(198), "y".repeat(100));
        let formatted = format_sdk_error(&err);
        assert_eq!(formatted, format!("\"{}...", "x".repeat(198)));
    }
}
