//! Persistence contracts consumed by the sync engine.
//!
//! All methods are blocking. Async callers run them on a blocking thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_types::{
    CrossServiceSyncResult, JobId, OAuthTokens, ScheduleId, SyncJobRecord, SyncJobRequest, UserId,
};

use crate::error::StorageResult;

/// A persisted recurring request. The schedule itself lives in `request.schedule`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSchedule {
    pub id: ScheduleId,
    pub request: SyncJobRequest,
}

/// Change-detection fingerprint for one item on one user's service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub user_service_id: String,
    pub external_id: String,
    pub item_type: String,
    pub checksum: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_sync_at: DateTime<Utc>,
    pub sync_count: u32,
}

impl SyncMetadata {
    /// Key identifying a user's account on a service.
    ///
    /// The user id is length-prefixed so that ids and service names
    /// containing `:` cannot collide.
    pub fn user_service_id(user_id: &UserId, service: &str) -> String {
        format!("{}:{user_id}:{service}", user_id.as_str().len())
    }
}

/// One fingerprint write. `sync_count` is maintained by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub user_service_id: String,
    pub external_id: String,
    pub item_type: String,
    pub checksum: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

/// Per-user job counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_jobs: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_items_synced: u64,
    pub total_items_failed: u64,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Recurring schedules, unique per `(user_id, sync_type)`.
pub trait ScheduleRepository: Send + Sync {
    /// Inserts or replaces the schedule for the request's `(user_id, sync_type)`.
    ///
    /// When a schedule already exists for that key its id is kept and
    /// returned; otherwise `id` is used.
    fn upsert_schedule(&self, id: ScheduleId, request: &SyncJobRequest) -> StorageResult<ScheduleId>;

    /// Returns true if a row was removed.
    fn delete_schedule(&self, id: ScheduleId) -> StorageResult<bool>;

    fn get_schedule(&self, id: ScheduleId) -> StorageResult<Option<StoredSchedule>>;

    fn find_schedule(&self, user_id: &UserId, sync_type: &str) -> StorageResult<Option<StoredSchedule>>;

    /// Enabled schedules whose next run is strictly after `now`.
    fn load_active_schedules(&self, now: DateTime<Utc>) -> StorageResult<Vec<StoredSchedule>>;

    fn list_schedules(&self) -> StorageResult<Vec<StoredSchedule>>;
}

/// Job records and their immutable results.
pub trait JobRepository: Send + Sync {
    /// Fails with `Conflict` if the id is taken.
    fn insert_job(&self, record: &SyncJobRecord) -> StorageResult<()>;

    /// Fails with `NotFound` if the job does not exist.
    fn update_job(&self, record: &SyncJobRecord) -> StorageResult<()>;

    fn get_job(&self, id: JobId) -> StorageResult<Option<SyncJobRecord>>;

    /// Most recent jobs first.
    fn recent_jobs(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<SyncJobRecord>>;

    /// Failed jobs with retries left whose `next_retry_at` is at or before `now`.
    fn retryable_jobs(&self, now: DateTime<Utc>) -> StorageResult<Vec<SyncJobRecord>>;

    /// Appends a result. Fails with `Conflict` if one exists for the job.
    fn save_result(&self, result: &CrossServiceSyncResult) -> StorageResult<()>;

    fn get_result(&self, job_id: JobId) -> StorageResult<Option<CrossServiceSyncResult>>;

    /// Updates the job record and appends its result in one transaction.
    fn complete_job(
        &self,
        record: &SyncJobRecord,
        result: Option<&CrossServiceSyncResult>,
    ) -> StorageResult<()>;

    fn job_stats(&self, user_id: &UserId) -> StorageResult<JobStats>;
}

/// Item fingerprints and per-direction cursors.
pub trait MetadataRepository: Send + Sync {
    fn get_metadata(
        &self,
        user_service_id: &str,
        external_id: &str,
        item_type: &str,
    ) -> StorageResult<Option<SyncMetadata>>;

    /// Applies all updates in one transaction, bumping `sync_count` per row.
    fn upsert_metadata_batch(&self, updates: &[MetadataUpdate]) -> StorageResult<()>;

    /// Time of the last successful sync from `from` to `to` for the user.
    fn last_pair_sync(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    fn record_pair_sync(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;
}

/// Encrypted OAuth tokens per `(user_id, service)`.
pub trait CredentialRepository: Send + Sync {
    fn save_tokens(&self, user_id: &UserId, service: &str, tokens: &OAuthTokens) -> StorageResult<()>;

    fn load_tokens(&self, user_id: &UserId, service: &str) -> StorageResult<Option<OAuthTokens>>;

    /// Returns true if a row was removed.
    fn delete_tokens(&self, user_id: &UserId, service: &str) -> StorageResult<bool>;

    /// Services the user has tokens for, sorted by name.
    fn connected_services(&self, user_id: &UserId) -> StorageResult<Vec<String>>;
}

/// Everything the engine needs from persistence.
pub trait Store: ScheduleRepository + JobRepository + MetadataRepository + CredentialRepository {}

impl<T> Store for T where
    T: ScheduleRepository + JobRepository + MetadataRepository + CredentialRepository
{
}
