//! Configuration management for the query engine
//!
//! TOML configuration files with environment variable overrides and
//! defaults for every field. [`crate::query::ExecutorConfig`] is derived from
//! a loaded [`Config`].

use crate::error::{Error, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on `num_shards`
pub const MAX_SHARDS: usize = 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query execution
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Query execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum steps per batch pulled through the operator tree
    #[serde(default = "default_steps_per_batch")]
    pub steps_per_batch: usize,

    /// How far back an instant selector looks for a sample (ms)
    #[serde(default = "default_lookback_delta_ms")]
    pub lookback_delta_ms: i64,

    /// History kept by each series' memoized iterator (ms)
    #[serde(default = "default_memo_window_ms")]
    pub memo_window_ms: i64,

    /// Query timeout (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of shards a query's series are split into
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,

    /// Maximum samples a single query may return
    #[serde(default = "default_max_result_samples")]
    pub max_result_samples: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Record Prometheus metrics for executed queries
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_steps_per_batch() -> usize { 10 }
fn default_lookback_delta_ms() -> i64 { 300_000 }
fn default_memo_window_ms() -> i64 { 300_000 }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_num_shards() -> usize { num_cpus::get() }
fn default_max_result_samples() -> usize { 50_000_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            steps_per_batch: default_steps_per_batch(),
            lookback_delta_ms: default_lookback_delta_ms(),
            memo_window_ms: default_memo_window_ms(),
            timeout_ms: default_timeout_ms(),
            num_shards: default_num_shards(),
            max_result_samples: default_max_result_samples(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        fn parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok().and_then(|v| v.parse().ok())
        }

        // Execution
        if let Some(v) = parsed("PROMQL_STEPS_PER_BATCH") {
            self.execution.steps_per_batch = v;
        }
        if let Some(v) = parsed("PROMQL_LOOKBACK_DELTA_MS") {
            self.execution.lookback_delta_ms = v;
        }
        if let Some(v) = parsed("PROMQL_TIMEOUT_MS") {
            self.execution.timeout_ms = v;
        }
        if let Some(v) = parsed("PROMQL_NUM_SHARDS") {
            self.execution.num_shards = v;
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Error> {
        let exec = &self.execution;
        if exec.steps_per_batch == 0 {
            return Err(Error::Configuration("Steps per batch must be > 0".to_string()));
        }
        if exec.lookback_delta_ms <= 0 {
            return Err(Error::Configuration("Lookback delta must be > 0".to_string()));
        }
        if exec.memo_window_ms < 0 {
            return Err(Error::Configuration("Memo window cannot be negative".to_string()));
        }
        if exec.timeout_ms == 0 {
            return Err(Error::Configuration("Timeout must be > 0".to_string()));
        }
        if exec.num_shards == 0 || exec.num_shards > MAX_SHARDS {
            return Err(ValidationError::OutOfRange {
                field: "num_shards".to_string(),
                value: exec.num_shards.to_string(),
                min: "1".to_string(),
                max: MAX_SHARDS.to_string(),
            }
            .into());
        }
        if exec.max_result_samples == 0 {
            return Err(Error::Configuration("Max result samples must be > 0".to_string()));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution.steps_per_batch, 10);
        assert_eq!(config.execution.lookback_delta_ms, 300_000);
        assert!(config.execution.num_shards > 0);
        assert!(config.monitoring.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_steps_per_batch() {
        let mut config = Config::default();
        config.execution.steps_per_batch = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_shard_count_bounds() {
        let mut config = Config::default();
        config.execution.num_shards = MAX_SHARDS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("num_shards"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promql.toml");
        std::fs::write(&path, "[execution]\nsteps_per_batch = 32\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.execution.steps_per_batch, 32);
        assert_eq!(config.execution.timeout_ms, 120_000);
        assert_eq!(config.monitoring.log_level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");

        let mut config = Config::default();
        config.execution.num_shards = 3;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.execution.num_shards, 3);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[execution\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("PROMQL_NUM_SHARDS", "7");
        std::env::set_var("PROMQL_STEPS_PER_BATCH", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.execution.num_shards, 7);
        assert_eq!(config.execution.steps_per_batch, 10);
        std::env::remove_var("PROMQL_NUM_SHARDS");
        std::env::remove_var("PROMQL_STEPS_PER_BATCH");
    }
}
