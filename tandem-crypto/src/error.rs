//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Empty plaintext or ciphertext.
    #[error("input must not be empty")]
    EmptyInput,

    /// Ciphertext shorter than the nonce that must prefix it.
    #[error("ciphertext too short: {len} bytes, need more than {min}")]
    CiphertextTooShort { len: usize, min: usize },

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, wrong scope or tampered data).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Base64 or UTF-8 decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}
