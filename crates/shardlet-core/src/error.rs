//! Error types for shardlet

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for shardlet
#[derive(Error, Debug)]
pub enum ShardletError {
    /// Bad device/worker arithmetic or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed request fields
    #[error("Payload error: {0}")]
    Payload(String),

    /// Payload could not be normalized into a model input row
    #[error("Decode error: {0}")]
    Decode(String),

    /// The batched model invocation failed
    #[error("Model execution error: {0}")]
    ModelExecution(String),

    /// An output row could not be mapped back to a response
    #[error("Postprocess error: {0}")]
    Postprocess(String),

    /// Execution context could not be bound to its devices
    #[error("Device binding error: {0}")]
    DeviceBinding(String),

    /// Model artifact could not be loaded
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Worker process could not be started
    #[error("Worker launch error: {0}")]
    Launch(String),

    /// Batch exceeded the configured response timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Worker not found
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// Worker exists but does not accept batches
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Batch rejected as a whole before any request was processed
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for shardlet operations
pub type ShardletResult<T> = Result<T, ShardletError>;

impl ShardletError {
    /// Category reported on the error response produced for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShardletError::Payload(_) => ErrorCategory::EmptyPayload,
            ShardletError::Decode(_) => ErrorCategory::Decode,
            ShardletError::ModelExecution(_) => ErrorCategory::ModelExecution,
            ShardletError::Postprocess(_) => ErrorCategory::Postprocess,
            ShardletError::Timeout(_) => ErrorCategory::Timeout,
            _ => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for ShardletError {
    fn from(err: serde_json::Error) -> Self {
        ShardletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ShardletError {
    fn from(err: toml::de::Error) -> Self {
        ShardletError::Config(err.to_string())
    }
}

/// Error category carried on a failed response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    EmptyPayload,
    Decode,
    Internal,
    ModelExecution,
    Timeout,
    Postprocess,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::EmptyPayload => write!(f, "empty payload"),
            ErrorCategory::Decode => write!(f, "decode error"),
            ErrorCategory::Internal => write!(f, "internal error"),
            ErrorCategory::ModelExecution => write!(f, "model execution error"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Postprocess => write!(f, "postprocess error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShardletError::Config("devices_per_worker must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: devices_per_worker must be positive"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ShardletError = io_err.into();
        assert!(matches!(err, ShardletError::Io(_)));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            ShardletError::Payload("missing data".to_string()).category(),
            ErrorCategory::EmptyPayload
        );
        assert_eq!(
            ShardletError::Decode("invalid utf-8".to_string()).category(),
            ErrorCategory::Decode
        );
        assert_eq!(
            ShardletError::Internal("boom".to_string()).category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            ShardletError::Launch("spawn failed".to_string()).category(),
            ErrorCategory::Internal
        );
        assert_eq!(ErrorCategory::EmptyPayload.to_string(), "empty payload");
    }
}
