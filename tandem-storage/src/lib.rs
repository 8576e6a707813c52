//! Persistence for Tandem.
//!
//! The engine talks to storage through four narrow repository traits:
//! - [`ScheduleRepository`]: recurring requests keyed by `(user_id, sync_type)`
//! - [`JobRepository`]: job records and append-only results keyed by job id
//! - [`MetadataRepository`]: per-item checksums and per-direction sync cursors
//! - [`CredentialRepository`]: OAuth tokens, encrypted per field
//!
//! [`SqliteStore`] implements all of them on one SQLite connection. Item
//! content is never stored, only fingerprints.

mod credentials;
mod error;
mod jobs;
mod metadata;
mod repository;
mod schedules;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use repository::{
    CredentialRepository, JobRepository, JobStats, MetadataRepository, MetadataUpdate,
    ScheduleRepository, Store, StoredSchedule, SyncMetadata,
};
pub use sqlite::SqliteStore;
