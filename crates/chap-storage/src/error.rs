//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage configuration error: {0}")]
    ConfigError(String),

    /// Keys must be relative paths made of normal components.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Failed to write {key}: {message}")]
    WriteFailed { key: String, message: String },

    #[error("Failed to read {key}: {message}")]
    ReadFailed { key: String, message: String },

    /// An existing table could not be decoded; it is never overwritten.
    #[error("Table {table} is unreadable: {reason}")]
    CorruptTable { table: String, reason: String },

    #[error("Row encoding error: {0}")]
    Encoding(String),

    #[error("Bucket unreachable: {0}")]
    Unreachable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn write_failed(key: impl Into<String>, message: impl ToString) -> Self {
        Self::WriteFailed {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn read_failed(key: impl Into<String>, message: impl ToString) -> Self {
        Self::ReadFailed {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn corrupt_table(table: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptTable {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    /// Network-side failures; a corrupt table or bad key stays broken.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::WriteFailed { .. }
                | StorageError::ReadFailed { .. }
                | StorageError::Unreachable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(StorageError::write_failed("videos/a.json", "timeout").is_retryable());
        assert!(!StorageError::corrupt_table("index/videos.parquet", "invalid footer").is_retryable());
        assert!(!StorageError::InvalidKey("../x".into()).is_retryable());
    }
}
