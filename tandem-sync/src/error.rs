//! Error types for the sync engine.

use tandem_model::ModelError;
use tandem_providers::ProviderError;
use tandem_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while accepting, scheduling or running sync jobs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// No adapter is registered under this name.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The user has no stored credentials for the service.
    #[error("service not connected: {service}")]
    ServiceNotConnected { service: String },

    /// Stored credentials are unusable and could not be refreshed.
    #[error("invalid credentials for {service}: {reason}")]
    InvalidCredentials { service: String, reason: String },

    #[error("invalid schedule: {0}")]
    ScheduleConfigInvalid(String),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job exists but is not running, so it cannot be cancelled.
    #[error("job {job_id} is {status}")]
    JobNotCancellable { job_id: String, status: String },

    /// The queue had no free slot within the allowed wait.
    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,

    #[error("cancelled while waiting for {0} rate limit")]
    RateLimitCancelled(String),

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A blocking storage task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tandem_types::Error> for SyncError {
    fn from(err: tandem_types::Error) -> Self {
        match err {
            tandem_types::Error::Validation(msg) => Self::Validation(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl SyncError {
    /// True when the caller may retry the same request later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::RateLimitCancelled(_))
    }

    /// True when a failed job may be re-run by the retry sweep.
    ///
    /// Authorization failures need the user to reconnect the service, so a
    /// re-run cannot succeed.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::ScheduleConfigInvalid(_)
            | Self::InvalidCredentials { .. }
            | Self::Cancelled => false,
            Self::Provider(e) => !e.is_auth(),
            _ => true,
        }
    }
}
