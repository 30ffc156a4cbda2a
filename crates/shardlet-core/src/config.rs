//! Configuration types for shardlet

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::DeviceKind;
use crate::error::{ShardletError, ShardletResult};

/// Top-level serving configuration.
///
/// Loaded once at pool startup and read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Worker and device assignment settings
    pub pool: PoolConfig,
    /// Batch pipeline settings
    pub batching: BatchingConfig,
    /// Model artifact location
    pub model: ModelDirConfig,
    /// Health API settings
    pub api: ApiConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServingConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> ShardletResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShardletError::Config(format!("Failed to read config file: {}", e))
        })?;
        let config: ServingConfig = toml::from_str(&content)
            .map_err(|e| ShardletError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that do not depend on a particular worker.
    ///
    /// Per-worker device arithmetic is left to the allocator so that a
    /// worker without enough devices fails alone.
    pub fn validate(&self) -> ShardletResult<()> {
        if self.pool.worker_count == 0 {
            return Err(ShardletError::Config(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.pool.devices_per_worker == 0 {
            return Err(ShardletError::Config(
                "devices_per_worker must be at least 1".to_string(),
            ));
        }
        if let Some(ids) = &self.pool.device_ids {
            let mut seen = HashSet::with_capacity(ids.len());
            if let Some(id) = ids.iter().find(|&&id| !seen.insert(id)) {
                return Err(ShardletError::Config(format!(
                    "device_ids lists device {} more than once",
                    id
                )));
            }
        }
        if self.batching.max_batch_size == 0 {
            return Err(ShardletError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.batching.max_length == 0 {
            return Err(ShardletError::Config(
                "max_length must be at least 1".to_string(),
            ));
        }
        if self.batching.response_timeout_ms == 0 {
            return Err(ShardletError::Config(
                "response_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker and device assignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers to start
    pub worker_count: u32,
    /// Number of devices each worker is bound to
    pub devices_per_worker: u32,
    /// Explicit device ids, sliced contiguously per worker
    pub device_ids: Option<Vec<u32>>,
    /// Kind of device the workers run on
    pub device_kind: DeviceKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            devices_per_worker: 1,
            device_ids: None,
            device_kind: DeviceKind::Cuda,
        }
    }
}

/// What to do with a tokenized sequence longer than `max_length`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Keep the first `max_length` tokens
    Truncate,
    /// Fail the request with a decode error
    Reject,
}

/// Batch pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Largest batch a worker accepts
    pub max_batch_size: usize,
    /// Fixed row width of the model input
    pub max_length: usize,
    /// Value used to right-pad short rows
    pub pad_id: i64,
    /// Handling of rows longer than `max_length`
    pub oversize_policy: OversizePolicy,
    /// Wall-clock bound on one batch, in milliseconds
    pub response_timeout_ms: u64,
}

impl BatchingConfig {
    /// Response timeout as a duration
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_length: 128,
            pad_id: 0,
            oversize_policy: OversizePolicy::Truncate,
            response_timeout_ms: 120_000,
        }
    }
}

/// Model artifact location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDirConfig {
    /// Directory holding `config.json` and `index_to_name.json`
    pub model_dir: PathBuf,
}

impl Default for ModelDirConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("/var/lib/shardlet/model"),
        }
    }
}

/// Health API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the health API server
    pub address: String,
    /// Port for the health API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
