//! Configuration: property bags, address resolution, the job configuration
//! builder, and the YAML job file used by the binary.

pub mod endpoint;
pub mod job;
pub mod settings;
mod vars;

pub use endpoint::{DEFAULT_PORT, Endpoint, resolve};
pub use job::{CommitterPolicy, JobConfig, STAGING_COMMITTER};
pub use settings::{PropertyBag, Settings, TableProperties, keys};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ConfigError, InvalidOptionSnafu, ReadFileSnafu, YamlParseSnafu};
use crate::storage::{HttpConnector, LocalConnector, StoreConnector};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// A job file: the table being read or written plus the host environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Table properties (`store.location`, optional `store.host`/`store.port`).
    #[serde(default)]
    pub table: TableProperties,
    /// Ambient settings the host framework would normally supply.
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub job: JobOptions,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// How task connections reach the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Root directory for the `local` backend.
    #[serde(default)]
    pub path: Option<String>,
    /// Extra HTTP client options (e.g. `timeout`, `allow_http`).
    #[serde(default)]
    pub client_options: HashMap<String, String>,
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Remote store at the resolved `host:port`.
    #[default]
    Http,
    /// A directory on the local filesystem; the address is still resolved
    /// and validated but not dialed.
    Local,
}

/// Runner options for the in-process host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// Number of write partitions an import is split into (default: 4).
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Maximum tasks running at once (default: 4).
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Whether to override a committer named by the ambient settings.
    #[serde(default)]
    pub committer_policy: CommitterPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            committer_policy: CommitterPolicy::default(),
        }
    }
}

fn default_partitions() -> usize {
    4
}

fn default_max_concurrent_tasks() -> usize {
    4
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to serve metrics (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load a job file, interpolating environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&vars::interpolate(&content)?)
    }

    /// Parse and validate YAML without interpolation.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.job.partitions > 0,
            InvalidOptionSnafu {
                message: "job.partitions must be at least 1"
            }
        );
        ensure!(
            self.job.max_concurrent_tasks > 0,
            InvalidOptionSnafu {
                message: "job.max_concurrent_tasks must be at least 1"
            }
        );
        ensure!(
            self.connection.backend != Backend::Local || self.connection.path.is_some(),
            InvalidOptionSnafu {
                message: "connection.path is required for the local backend"
            }
        );
        Ok(())
    }

    /// Build the job configuration from the table properties and settings.
    pub fn job_config(&self) -> Result<JobConfig, ConfigError> {
        JobConfig::build(&self.table, &self.settings, self.job.committer_policy)
    }

    /// Connector that hands each task its own store connection.
    pub fn connector(&self) -> Arc<dyn StoreConnector> {
        match (self.connection.backend, &self.connection.path) {
            (Backend::Local, Some(path)) => Arc::new(LocalConnector::new(path)),
            _ => Arc::new(HttpConnector::new(self.connection.client_options.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
table:
  store.location: my_index/my_type
settings:
  store.host: es0
  store.batch.size.entries: "100"
connection:
  backend: local
  path: /tmp/glacier
job:
  partitions: 8
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.backend, Backend::Local);
        assert_eq!(config.job.partitions, 8);
        assert_eq!(config.job.max_concurrent_tasks, 4);
        assert!(!config.metrics.enabled);

        let job = config.job_config().unwrap();
        assert_eq!(job.endpoint().to_string(), "es0:9200");
        assert_eq!(job.batch_size_entries().unwrap(), 100);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_yaml("table:\n  store.location: logs\n").unwrap();
        assert_eq!(config.connection.backend, Backend::Http);
        assert_eq!(config.job.committer_policy, CommitterPolicy::Pin);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
    }

    #[test]
    fn test_local_backend_requires_path() {
        let err = Config::from_yaml("connection:\n  backend: local\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let err = Config::from_yaml("job:\n  partitions: 0\n").unwrap_err();
        assert!(err.to_string().contains("partitions"));
    }
}
