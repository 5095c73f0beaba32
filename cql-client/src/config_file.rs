//! File-based and environment-based configuration loading.
//!
//! Supports YAML and TOML files (behind the `config-file` feature) and
//! environment variables (always available).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use cql_core::Consistency;
use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, ConfigError};
use crate::policies::reconnection::{
    ConstantReconnectionPolicy, ExponentialReconnectionPolicy, ReconnectionPolicy,
};
use crate::policies::retry::{
    DefaultRetryPolicy, FallthroughRetryPolicy, IdempotenceAwareRetryPolicy, RetryPolicy,
};
use crate::policies::speculative_execution::ConstantSpeculativeExecutionPolicy;
use crate::policies::{default_load_balancing_policy, Policies};
use crate::security::PlainTextAuthProvider;

/// Top-level file configuration structure.
///
/// All fields are optional; unset fields use the builder defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Contact point IP addresses.
    pub contact_points: Option<Vec<String>>,
    /// Native protocol port.
    pub port: Option<u16>,
    /// Datacenter treated as local by the default load balancing policy.
    pub local_datacenter: Option<String>,
    /// Connection timeout in milliseconds.
    pub connection_timeout_ms: Option<u64>,
    /// Query defaults.
    pub query: Option<FileQueryConfig>,
    /// Admission limits.
    pub pooling: Option<FilePoolingConfig>,
    /// Policy selection.
    pub policies: Option<FilePoliciesConfig>,
    /// Plain-text credentials.
    pub auth: Option<FileAuthConfig>,
}

/// Query defaults in file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileQueryConfig {
    /// Default keyspace.
    pub keyspace: Option<String>,
    /// Consistency level name, e.g. `"LOCAL_QUORUM"`.
    pub consistency: Option<String>,
    /// Serial consistency level name.
    pub serial_consistency: Option<String>,
    /// Whether statements are idempotent by default.
    pub idempotent: Option<bool>,
    /// Rows per page.
    pub page_size: Option<usize>,
    /// Overall request timeout in milliseconds. `0` disables it.
    pub request_timeout_ms: Option<u64>,
}

/// Admission limits in file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilePoolingConfig {
    /// In-flight requests per host.
    pub max_requests_per_host: Option<usize>,
    /// Requests allowed to wait for a slot per host.
    pub max_queued_per_host: Option<usize>,
}

/// Policy selection in file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilePoliciesConfig {
    /// `"default"`, `"idempotence-aware"` or `"fallthrough"`.
    pub retry: Option<String>,
    /// Reconnection backoff.
    pub reconnection: Option<FileReconnectionConfig>,
    /// Speculative execution; absent disables it.
    pub speculative_execution: Option<FileSpeculativeConfig>,
    /// Whether the client generates write timestamps.
    pub client_timestamps: Option<bool>,
}

/// Reconnection backoff in file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileReconnectionConfig {
    /// `"exponential"` (default) or `"constant"`.
    pub kind: Option<String>,
    /// Base (or constant) delay in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Maximum delay in milliseconds, exponential only.
    pub max_delay_ms: Option<u64>,
    /// Whether the first attempt is immediate, exponential only.
    pub start_with_no_delay: Option<bool>,
}

/// Constant speculative execution in file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileSpeculativeConfig {
    /// Delay before each speculative execution, in milliseconds.
    pub delay_ms: Option<u64>,
    /// Maximum number of speculative executions.
    pub max_executions: Option<u32>,
}

/// Plain-text credentials in file format.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileAuthConfig {
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl std::fmt::Debug for FileAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

fn parse_consistency(field: &str, value: &str) -> Result<Consistency, ConfigError> {
    value
        .parse::<Consistency>()
        .map_err(|e| ConfigError::new(format!("invalid {field}: {e}")))
}

fn build_retry_policy(name: &str) -> Result<Arc<dyn RetryPolicy>, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "default" => Ok(Arc::new(DefaultRetryPolicy)),
        "idempotence-aware" => Ok(Arc::new(IdempotenceAwareRetryPolicy::default())),
        "fallthrough" => Ok(Arc::new(FallthroughRetryPolicy)),
        other => Err(ConfigError::new(format!(
            "unknown retry policy: {other} (expected default, idempotence-aware, or fallthrough)"
        ))),
    }
}

fn build_reconnection_policy(
    file: &FileReconnectionConfig,
) -> Result<Arc<dyn ReconnectionPolicy>, ConfigError> {
    let defaults = ExponentialReconnectionPolicy::default();
    match file.kind.as_deref().unwrap_or("exponential") {
        "constant" => {
            let delay = file
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay());
            Ok(Arc::new(ConstantReconnectionPolicy::new(delay)))
        }
        "exponential" => {
            let base = file
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay());
            let max = file
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay());
            let policy = ExponentialReconnectionPolicy::new(
                base,
                max,
                file.start_with_no_delay.unwrap_or(false),
            )
            .map_err(|e| ConfigError::new(e.to_string()))?;
            Ok(Arc::new(policy))
        }
        other => Err(ConfigError::new(format!(
            "unknown reconnection policy kind: {other} (expected constant or exponential)"
        ))),
    }
}

fn build_policies(
    file: FilePoliciesConfig,
    local_datacenter: Option<String>,
) -> Result<Policies, ConfigError> {
    let mut policies = Policies {
        load_balancing: default_load_balancing_policy(local_datacenter),
        ..Policies::default()
    };

    if let Some(name) = file.retry {
        policies.retry = build_retry_policy(&name)?;
    }
    if let Some(reconnection) = file.reconnection {
        policies.reconnection = build_reconnection_policy(&reconnection)?;
    }
    if let Some(speculative) = file.speculative_execution {
        let delay = Duration::from_millis(speculative.delay_ms.unwrap_or(0));
        let policy = ConstantSpeculativeExecutionPolicy::new(
            delay,
            speculative.max_executions.unwrap_or(1),
        )
        .map_err(|e| ConfigError::new(e.to_string()))?;
        policies.speculative_execution = Arc::new(policy);
    }
    if file.client_timestamps == Some(false) {
        policies.timestamp_generation = None;
    }
    Ok(policies)
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfig::builder();

        if let Some(points) = file.contact_points {
            let parsed = points
                .iter()
                .map(|p| {
                    p.trim()
                        .parse::<IpAddr>()
                        .map_err(|e| ConfigError::new(format!("invalid contact point '{p}': {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.contact_points(parsed);
        }

        if let Some(port) = file.port {
            builder = builder.port(port);
        }

        if let Some(dc) = file.local_datacenter.clone() {
            builder = builder.local_datacenter(dc);
        }

        if let Some(ms) = file.connection_timeout_ms {
            builder = builder.connection_timeout(Duration::from_millis(ms));
        }

        if let Some(query) = file.query {
            let consistency = query
                .consistency
                .as_deref()
                .map(|c| parse_consistency("consistency", c))
                .transpose()?;
            let serial_consistency = query
                .serial_consistency
                .as_deref()
                .map(|c| parse_consistency("serial-consistency", c))
                .transpose()?;

            builder = builder.query(|mut q| {
                if let Some(ks) = query.keyspace {
                    q = q.keyspace(ks);
                }
                if let Some(c) = consistency {
                    q = q.consistency(c);
                }
                if let Some(c) = serial_consistency {
                    q = q.serial_consistency(c);
                }
                if let Some(idempotent) = query.idempotent {
                    q = q.idempotent(idempotent);
                }
                if let Some(size) = query.page_size {
                    q = q.page_size(size);
                }
                match query.request_timeout_ms {
                    Some(0) => q = q.no_request_timeout(),
                    Some(ms) => q = q.request_timeout(Duration::from_millis(ms)),
                    None => {}
                }
                q
            });
        }

        if let Some(pooling) = file.pooling {
            builder = builder.pooling(|mut p| {
                if let Some(max) = pooling.max_requests_per_host {
                    p = p.max_requests_per_host(max);
                }
                if let Some(max) = pooling.max_queued_per_host {
                    p = p.max_queued_per_host(max);
                }
                p
            });
        }

        if let Some(policies) = file.policies {
            builder = builder.policies(build_policies(policies, file.local_datacenter)?);
        }

        if let Some(auth) = file.auth {
            match (auth.username, auth.password) {
                (Some(user), Some(pass)) => {
                    let provider = PlainTextAuthProvider::new(user, pass);
                    builder = builder.auth_provider(Arc::new(provider));
                }
                (None, None) => {}
                _ => {
                    return Err(ConfigError::new(
                        "auth requires both username and password",
                    ))
                }
            }
        }

        builder.build()
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file.
    ///
    /// Requires the `config-file` feature.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ClientConfig::from_yaml("cql-client.yaml")?;
    /// ```
    #[cfg(feature = "config-file")]
    pub fn from_yaml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("failed to read YAML config file: {e}")))?;
        Self::from_yaml_str(&content)
    }

    /// Parses configuration from YAML text.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let file_config: FileConfig = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::new(format!("failed to parse YAML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("failed to read TOML config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file_config: FileConfig = toml_crate::from_str(content)
            .map_err(|e| ConfigError::new(format!("failed to parse TOML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// # Supported Environment Variables
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `CQL_CONTACT_POINTS` | Comma-separated IP addresses |
    /// | `CQL_PORT` | Native protocol port |
    /// | `CQL_LOCAL_DATACENTER` | Local datacenter |
    /// | `CQL_CONNECTION_TIMEOUT_MS` | Connection timeout in milliseconds |
    /// | `CQL_KEYSPACE` | Default keyspace |
    /// | `CQL_CONSISTENCY` | Default consistency level |
    /// | `CQL_REQUEST_TIMEOUT_MS` | Request timeout in milliseconds, `0` disables |
    /// | `CQL_USERNAME` / `CQL_PASSWORD` | Plain-text credentials |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut file_config = FileConfig::default();

        if let Some(val) = var("CQL_CONTACT_POINTS") {
            file_config.contact_points = Some(
                val.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        if let Some(val) = var("CQL_PORT") {
            let port = val
                .parse::<u16>()
                .map_err(|e| ConfigError::new(format!("invalid CQL_PORT: {e}")))?;
            file_config.port = Some(port);
        }

        if let Some(val) = var("CQL_LOCAL_DATACENTER") {
            file_config.local_datacenter = Some(val);
        }

        if let Some(val) = var("CQL_CONNECTION_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                file_config.connection_timeout_ms = Some(ms);
            }
        }

        if let Some(val) = var("CQL_KEYSPACE") {
            file_config.query.get_or_insert_with(Default::default).keyspace = Some(val);
        }

        if let Some(val) = var("CQL_CONSISTENCY") {
            file_config.query.get_or_insert_with(Default::default).consistency = Some(val);
        }

        if let Some(val) = var("CQL_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                file_config
                    .query
                    .get_or_insert_with(Default::default)
                    .request_timeout_ms = Some(ms);
            }
        }

        let username = var("CQL_USERNAME");
        let password = var("CQL_PASSWORD");
        if username.is_some() || password.is_some() {
            file_config.auth = Some(FileAuthConfig { username, password });
        }

        file_config.try_into()
    }
}

/// Loads a configuration file, detecting the format by extension.
///
/// Supports `.yaml`, `.yml`, and `.toml` extensions.
/// Requires the `config-file` feature.
#[cfg(feature = "config-file")]
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => ClientConfig::from_yaml(path),
        Some("toml") => ClientConfig::from_toml(path),
        Some(ext) => Err(ConfigError::new(format!(
            "unsupported config file extension: .{ext} (expected .yaml, .yml, or .toml)"
        ))),
        None => Err(ConfigError::new(
            "config file has no extension; expected .yaml, .yml, or .toml",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_file_config_defaults_produce_valid_client_config() {
        let config: ClientConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.port(), 9042);
        assert_eq!(config.query().consistency(), Consistency::LocalOne);
    }

    #[test]
    fn test_file_config_with_query() {
        let file_config = FileConfig {
            contact_points: Some(vec!["10.0.0.1".into(), " 10.0.0.2 ".into()]),
            local_datacenter: Some("dc1".into()),
            query: Some(FileQueryConfig {
                keyspace: Some("app".into()),
                consistency: Some("local_quorum".into()),
                serial_consistency: Some("LOCAL_SERIAL".into()),
                idempotent: Some(true),
                page_size: Some(100),
                request_timeout_ms: Some(0),
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.contact_points().len(), 2);
        assert_eq!(config.local_datacenter(), Some("dc1"));
        let query = config.query();
        assert_eq!(query.keyspace(), Some("app"));
        assert_eq!(query.consistency(), Consistency::LocalQuorum);
        assert_eq!(query.serial_consistency(), Some(Consistency::LocalSerial));
        assert!(query.is_idempotent());
        assert_eq!(query.page_size(), 100);
        assert_eq!(query.request_timeout(), None);
    }

    #[test]
    fn test_file_config_rejects_unknown_consistency() {
        let file_config = FileConfig {
            query: Some(FileQueryConfig {
                consistency: Some("MOST".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = ClientConfig::try_from(file_config).unwrap_err();
        assert!(err.to_string().contains("invalid consistency"));
    }

    #[test]
    fn test_file_config_rejects_bad_contact_point() {
        let file_config = FileConfig {
            contact_points: Some(vec!["not-an-ip".into()]),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(file_config).is_err());
    }

    #[test]
    fn test_file_config_with_pooling() {
        let file_config = FileConfig {
            pooling: Some(FilePoolingConfig {
                max_requests_per_host: Some(64),
                max_queued_per_host: Some(0),
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.pooling().max_requests_per_host(), 64);
        assert_eq!(config.pooling().max_queued_per_host(), 0);
    }

    #[test]
    fn test_file_config_with_policies() {
        let file_config = FileConfig {
            policies: Some(FilePoliciesConfig {
                retry: Some("fallthrough".into()),
                reconnection: Some(FileReconnectionConfig {
                    kind: Some("exponential".into()),
                    base_delay_ms: Some(200),
                    max_delay_ms: Some(10_000),
                    start_with_no_delay: Some(true),
                }),
                speculative_execution: Some(FileSpeculativeConfig {
                    delay_ms: Some(50),
                    max_executions: Some(2),
                }),
                client_timestamps: Some(false),
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        let policies = config.policies();
        assert!(policies.timestamp_generation.is_none());
        let options = policies.reconnection.options();
        assert_eq!(options["baseDelay"], "200");
        assert_eq!(options["startWithNoDelay"], "true");
        assert_eq!(policies.speculative_execution.options()["maxSpeculativeExecutions"], "2");
        assert!(format!("{:?}", policies.retry).contains("Fallthrough"));
    }

    #[test]
    fn test_file_config_rejects_invalid_policies() {
        let bad_retry = FileConfig {
            policies: Some(FilePoliciesConfig {
                retry: Some("aggressive".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(bad_retry).is_err());

        let bad_backoff = FileConfig {
            policies: Some(FilePoliciesConfig {
                reconnection: Some(FileReconnectionConfig {
                    base_delay_ms: Some(5_000),
                    max_delay_ms: Some(1_000),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(bad_backoff).is_err());
    }

    #[test]
    fn test_file_config_auth_requires_both_fields() {
        let file_config = FileConfig {
            auth: Some(FileAuthConfig {
                username: Some("cassandra".into()),
                password: None,
            }),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(file_config).is_err());
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("CQL_CONTACT_POINTS", "10.0.0.1, 10.0.0.2"),
            ("CQL_PORT", "19042"),
            ("CQL_LOCAL_DATACENTER", "dc2"),
            ("CQL_CONSISTENCY", "QUORUM"),
            ("CQL_USERNAME", "app"),
            ("CQL_PASSWORD", "secret"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.contact_points().len(), 2);
        assert_eq!(config.port(), 19042);
        assert_eq!(config.local_datacenter(), Some("dc2"));
        assert_eq!(config.query().consistency(), Consistency::Quorum);
        assert!(config.auth_provider().is_some());
    }

    #[test]
    fn test_from_vars_rejects_bad_port() {
        let err = ClientConfig::from_vars(|k| (k == "CQL_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CQL_PORT"));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_yaml_str() {
        let yaml = r#"
contact-points: ["127.0.0.1"]
local-datacenter: dc1
query:
  consistency: LOCAL_QUORUM
  page-size: 500
policies:
  retry: idempotence-aware
"#;
        let config = ClientConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.local_datacenter(), Some("dc1"));
        assert_eq!(config.query().consistency(), Consistency::LocalQuorum);
        assert_eq!(config.query().page_size(), 500);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_str() {
        let toml_str = r#"
port = 9142

[pooling]
max-requests-per-host = 128

[policies.speculative-execution]
delay-ms = 100
max-executions = 3
"#;
        let config = ClientConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.port(), 9142);
        assert_eq!(config.pooling().max_requests_per_host(), 128);
        assert_eq!(
            config.policies().speculative_execution.options()["delay"],
            "100"
        );
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_load_config_rejects_unknown_extension() {
        let err = load_config("client.ini").unwrap_err();
        assert!(err.to_string().contains("unsupported config file extension"));
    }
}
