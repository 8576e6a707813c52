//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Token encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(#[from] tandem_crypto::CryptoError),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write to an append-only record that already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// Stored data could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
