//! Core type definitions for Tandem.
//!
//! This crate defines the plain data types shared by every layer of the
//! cross-service sync engine:
//! - Job, schedule and user identifiers (UUID v7 where generated)
//! - Sync requests: service pairs, modes, options and schedules
//! - Job records and their status state machine
//! - Raw items exchanged with providers and the OAuth token bundle
//! - The result family aggregated by the executor
//!
//! Provider-specific payload handling lives in `tandem-model`, not here.

mod auth;
mod ids;
mod item;
mod job;
mod request;
mod result;
mod schedule;

pub use auth::OAuthTokens;
pub use ids::{JobId, ScheduleId, UserId};
pub use item::{ItemAction, ItemType, SyncItem};
pub use job::{JobStatus, SyncJobRecord};
pub use request::{
    ConflictPolicy, CrossServiceSyncRequest, Priority, ServicePair, SyncDirection, SyncJobRequest,
    SyncMode, SyncOptions, DEFAULT_MATCH_THRESHOLD,
};
pub use result::{CrossServiceSyncResult, ItemError, ServicePairResult, SyncResult};
pub use schedule::{SyncSchedule, MIN_SCHEDULE_FREQUENCY};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request or one of its parts is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    /// An enum value could not be parsed from its string form.
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
