//! Error types for item normalization and conflict resolution.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while normalizing or reconciling items.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The provider reported an item kind the engine cannot represent.
    #[error("unsupported item type '{item_type}' from {service}")]
    UnsupportedItemType { service: String, item_type: String },

    /// The payload is missing a required field or has the wrong shape.
    #[error("invalid {service} payload for {external_id}: {reason}")]
    InvalidPayload {
        service: String,
        external_id: String,
        reason: String,
    },

    /// A conflict was resolved between two items of different kinds.
    #[error("cannot reconcile a {source_type} with a {target_type}")]
    IncompatibleItems {
        source_type: &'static str,
        target_type: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
