//! Configuration loading for murmur.
//!
//! Every section has defaults matching the documented behaviour, so a TOML
//! file only needs the values it overrides. Unknown keys are rejected.

use crate::{Address, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MurmurConfig {
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub executor: ExecutorConfig,
    pub cache: CacheConfig,
    pub live: LiveConfig,
    pub metrics: MetricsConfig,
}

/// Write queue and batch scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Batch scheduler tick
    pub batch_interval_ms: u64,
    /// Maximum intents handed to the executor per tick
    pub max_batch_size: usize,
    /// Drain immediately when an intent arrives on an idle queue
    pub drain_on_idle_enqueue: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 50,
            max_batch_size: 50,
            drain_on_idle_enqueue: true,
        }
    }
}

/// Retry ceiling for retryable write failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Transaction submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Safety multiplier applied to the cost estimate (> 1.0)
    pub gas_buffer_multiplier: f64,
    /// Confirmations to await per write
    pub confirmations: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            gas_buffer_multiplier: 1.2,
            confirmations: 1,
        }
    }
}

/// Read cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub read_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { read_ttl_ms: 5_000 }
    }
}

/// Live aggregates, reconciliation and subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveConfig {
    pub reconcile_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Schema live action records are published under
    pub schema_name: String,
    /// Publisher whose live action stream is authoritative
    pub publisher: Address,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 2_000,
            poll_interval_ms: 2_000,
            schema_name: crate::LIVE_ACTION_SCHEMA.to_string(),
            publisher: Address::ZERO,
        }
    }
}

/// Metrics and outcome retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub outcome_retention_secs: u64,
    pub throughput_window_ms: u64,
    pub prune_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            outcome_retention_secs: 3_600,
            throughput_window_ms: 1_000,
            prune_interval_secs: 60,
        }
    }
}

impl MurmurConfig {
    /// Load from `--config <path>` or `MURMUR_CONFIG`, apply env overrides, validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MurmurConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables:
    /// - `MURMUR_BATCH_INTERVAL_MS`
    /// - `MURMUR_MAX_BATCH_SIZE`
    /// - `MURMUR_MAX_RETRIES`
    /// - `MURMUR_GAS_BUFFER_MULTIPLIER`
    /// - `MURMUR_READ_TTL_MS`
    /// - `MURMUR_RECONCILE_INTERVAL_MS`
    /// - `MURMUR_POLL_INTERVAL_MS`
    /// - `MURMUR_LIVE_PUBLISHER`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("MURMUR_BATCH_INTERVAL_MS") {
            self.queue.batch_interval_ms = v;
        }
        if let Some(v) = env_parse("MURMUR_MAX_BATCH_SIZE") {
            self.queue.max_batch_size = v;
        }
        if let Some(v) = env_parse("MURMUR_MAX_RETRIES") {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_parse("MURMUR_GAS_BUFFER_MULTIPLIER") {
            self.executor.gas_buffer_multiplier = v;
        }
        if let Some(v) = env_parse("MURMUR_READ_TTL_MS") {
            self.cache.read_ttl_ms = v;
        }
        if let Some(v) = env_parse("MURMUR_RECONCILE_INTERVAL_MS") {
            self.live.reconcile_interval_ms = v;
        }
        if let Some(v) = env_parse("MURMUR_POLL_INTERVAL_MS") {
            self.live.poll_interval_ms = v;
        }
        if let Some(v) = env_parse("MURMUR_LIVE_PUBLISHER") {
            self.live.publisher = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.batch_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.batch_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.queue.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.max_batch_size",
                reason: "must be > 0".to_string(),
            });
        }
        let multiplier = self.executor.gas_buffer_multiplier;
        if multiplier.is_nan() || multiplier <= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "executor.gas_buffer_multiplier",
                reason: "must be > 1.0".to_string(),
            });
        }
        if self.executor.confirmations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor.confirmations",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.cache.read_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.read_ttl_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.live.reconcile_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "live.reconcile_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.live.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "live.poll_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.live.schema_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "live.schema_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.metrics.outcome_retention_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.outcome_retention_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.metrics.throughput_window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.throughput_window_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.metrics.prune_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.prune_interval_secs",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

impl CacheConfig {
    pub fn read_ttl(&self) -> Duration {
        Duration::from_millis(self.read_ttl_ms)
    }
}

impl LiveConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl MetricsConfig {
    pub fn outcome_retention(&self) -> Duration {
        Duration::from_secs(self.outcome_retention_secs)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("MURMUR_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
