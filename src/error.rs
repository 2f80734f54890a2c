use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage unavailable during {operation} after {attempts} attempt(s): {message}")]
    StorageUnavailable {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Storage operation {operation} timed out after {timeout:?}")]
    StorageTimeout { operation: String, timeout: Duration },

    #[error("Schema incompatible for table {table}: {message}")]
    SchemaIncompatible { table: String, message: String },

    #[error("Run slot is held by {holder}")]
    ConcurrentRunRejected { holder: String },

    #[error("Run slot lease lost, now held by {holder}")]
    LeaseLost { holder: String },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessingError::Io(_)
                | ProcessingError::StorageTimeout { .. }
                | ProcessingError::StorageUnavailable { .. }
        )
    }
}

impl From<config::ConfigError> for ProcessingError {
    fn from(err: config::ConfigError) -> Self {
        ProcessingError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let io = ProcessingError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow disk",
        ));
        assert!(io.is_transient());

        let schema = ProcessingError::SchemaIncompatible {
            table: "weather".to_string(),
            message: "column added".to_string(),
        };
        assert!(!schema.is_transient());

        let lost = ProcessingError::LeaseLost {
            holder: "run-2".to_string(),
        };
        assert!(!lost.is_transient());
        assert_eq!(lost.to_string(), "Run slot lease lost, now held by run-2");
    }
}
