use std::time::Duration;

use serde::Deserialize;

use crate::error::ConsumerError;

/// Env var naming the YAML config file path.
pub const CONFIG_PATH_ENV: &str = "COUNTER_BRIDGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn default_stream_key() -> String {
    "counter-bridge:events".to_string()
}

fn default_consumer_group() -> String {
    "counter-bridge-group".to_string()
}

fn default_max_wait_ms() -> u64 {
    500
}

fn default_max_messages() -> u64 {
    1000
}

fn default_bind_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_metrics_bind_address() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Recognized configuration options. `log_url`/`database_url` are the
/// log endpoint and storage provider connection strings — required,
/// everything else has a documented default.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub log_url: String,
    pub database_url: String,

    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Unique within the group. Auto-generated per process when absent.
    #[serde(default)]
    pub consumer_id: Option<String>,

    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    #[serde(default = "default_max_messages")]
    pub max_messages: u64,

    /// Ambient: where the health/stats HTTP surface (`health.rs`) binds.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Ambient: where the Prometheus exporter serves `/metrics`.
    #[serde(default = "default_metrics_bind_address")]
    pub metrics_bind_address: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Configuration {
    pub fn load(path: &str) -> Result<Self, ConsumerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConsumerError::Config(format!("reading {path}: {e}")))?;
        serde_yaml::from_str(&raw).map_err(|e| ConsumerError::Config(format!("parsing {path}: {e}")))
    }

    /// Loads from the path named by `COUNTER_BRIDGE_CONFIG`, falling back
    /// to `config.yaml` in the working directory.
    pub fn load_from_env() -> Result<Self, ConsumerError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    pub fn consumer_id(&self) -> String {
        self.consumer_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_absent() {
        let yaml = "log_url: redis://localhost:6379\ndatabase_url: postgres://localhost/counters\n";
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.stream_key, "counter-bridge:events");
        assert_eq!(config.consumer_group, "counter-bridge-group");
        assert_eq!(config.max_wait_ms, 500);
        assert_eq!(config.max_messages, 1000);
        assert!(config.consumer_id.is_none());
    }

    #[test]
    fn consumer_id_is_generated_when_absent() {
        let yaml = "log_url: redis://localhost:6379\ndatabase_url: postgres://localhost/counters\n";
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        let a = config.consumer_id();
        let b = config.consumer_id();
        assert_ne!(a, b, "each call without a configured id mints a fresh one");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = "log_url: redis://localhost:6379\ndatabase_url: postgres://localhost/counters\nmax_messages: 42\n";
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_messages, 42);
    }
}
