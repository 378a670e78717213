//! Error types for the TideKV storage engine.

use thiserror::Error;

/// Result type used throughout the storage engine.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage engine and its write log.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Delete was issued for a key with no live entry.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A value or log record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Opening or appending to the write log failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write-log line could not be decoded during recovery.
    #[error("corrupt write log at line {line}: {reason}")]
    CorruptLog { line: usize, reason: String },

    /// Rejected engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Returns true if the error means the key had no live entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::KeyNotFound(_))
    }
}
