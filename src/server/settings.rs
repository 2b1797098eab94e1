use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::server::custom_resource::WaitPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub waiter: WaiterSettings,
    #[serde(default)]
    pub handler: HandlerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// AWS client configuration for the ECR store
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AwsSettings {
    /// AWS region (e.g., "us-east-1"); the default provider chain is used when unset
    #[serde(default)]
    pub region: Option<String>,
    /// Optional: AWS access key ID (if not using an IAM role)
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Optional: AWS secret access key (if not using an IAM role)
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Optional: override the ECR endpoint, e.g. for a local emulator
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct WaiterSettings {
    /// Seconds between consistency probes (default: 5)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Probes before giving up on a state transition (default: 24)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for WaiterSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl WaiterSettings {
    pub fn policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_attempts,
        }
    }
}

fn default_timeout() -> u64 {
    840 // 14 minutes, under the 15 minute function limit
}

fn default_report_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandlerSettings {
    /// Upper bound for reconciling one invocation before a failure is reported
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// HTTP timeout for delivering the completion report
    #[serde(default = "default_report_timeout")]
    pub report_timeout_secs: u64,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            report_timeout_secs: default_report_timeout(),
        }
    }
}

impl HandlerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
            .expect("env substitution pattern is valid");

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Add `{config_dir}/{name}.{toml,yaml,yml}` if present
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) {
        for ext in ["toml", "yaml", "yml"] {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return;
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("ECR_RECONCILER_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("ECR_RECONCILER_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        Self::load(&config_dir, &run_mode)
    }

    /// Load settings from a config directory, then `ECR_RECONCILER__*` environment variables
    pub fn load(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Every file is optional; defaults cover a function deployment with an IAM role
        Self::try_add_config_file(&mut builder, config_dir, "default");
        Self::try_add_config_file(&mut builder, config_dir, run_mode);
        Self::try_add_config_file(&mut builder, config_dir, "local");

        let config = builder
            .add_source(
                Environment::with_prefix("ECR_RECONCILER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// The waiter's worst case must leave the handler time to report
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waiter.max_attempts == 0 {
            return Err(ConfigError::Message(
                "waiter.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.waiter.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "waiter.poll_interval_secs must be at least 1".to_string(),
            ));
        }

        let wait_bound = self
            .waiter
            .poll_interval_secs
            .saturating_mul(u64::from(self.waiter.max_attempts));
        if wait_bound >= self.handler.timeout_secs {
            return Err(ConfigError::Message(format!(
                "waiter bound of {}s (poll_interval_secs * max_attempts) must be below handler.timeout_secs ({}s)",
                wait_bound, self.handler.timeout_secs
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("ECR_RECONCILER_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${ECR_RECONCILER_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("ECR_RECONCILER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("ECR_RECONCILER_MISSING_VAR");
        let result =
            Settings::substitute_env_vars_in_string("${ECR_RECONCILER_MISSING_VAR:-us-west-2}");
        assert_eq!(result, "us-west-2");
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.waiter.policy().max_attempts, 24);
        assert_eq!(
            settings.waiter.policy().poll_interval,
            Duration::from_secs(5)
        );
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.waiter.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_wait_bound_over_handler_timeout() {
        let mut settings = Settings::default();
        settings.waiter.poll_interval_secs = 10;
        settings.waiter.max_attempts = 90;
        settings.handler.timeout_secs = 900;
        assert!(settings.validate().is_err());

        settings.waiter.max_attempts = 89;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[aws]
region = "${ECR_RECONCILER_TEST_REGION:-eu-west-1}"

[waiter]
poll_interval_secs = 2
max_attempts = 10
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("production.yaml"),
            "handler:\n  timeout_secs: 300\n",
        )
        .unwrap();

        let settings =
            Settings::load(dir.path().to_str().unwrap(), "production").unwrap();

        assert_eq!(settings.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.waiter.poll_interval_secs, 2);
        assert_eq!(settings.waiter.max_attempts, 10);
        assert_eq!(settings.handler.timeout_secs, 300);
        assert_eq!(settings.handler.report_timeout_secs, 30);
    }

    #[test]
    fn test_load_rejects_invalid_wait_bound() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[waiter]\npoll_interval_secs = 60\nmax_attempts = 60\n",
        )
        .unwrap();

        assert!(Settings::load(dir.path().to_str().unwrap(), "development").is_err());
    }
}
