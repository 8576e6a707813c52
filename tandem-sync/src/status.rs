//! Typed responses of the sync service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_providers::UserProfile;
use tandem_storage::JobStats;
use tandem_types::{
    CrossServiceSyncResult, JobId, JobStatus, Priority, ScheduleId, ServicePair, SyncJobRecord,
    SyncJobRequest,
};

/// Acknowledgement of a queued manual sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualSyncAccepted {
    pub accepted: bool,
    pub job_id: JobId,
    pub description: String,
    pub total_directions: usize,
}

/// Acknowledgement of a saved recurring sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAccepted {
    pub accepted: bool,
    pub schedule_id: ScheduleId,
    pub next_run: Option<DateTime<Utc>>,
}

/// Partial schedule change. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub frequency_secs: Option<u64>,
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.frequency_secs.is_none()
    }
}

/// A recurring sync as shown to its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub schedule_id: ScheduleId,
    pub sync_type: String,
    pub service_pairs: Vec<ServicePair>,
    pub enabled: bool,
    pub frequency_secs: u64,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduleSummary {
    pub fn new(schedule_id: ScheduleId, request: &SyncJobRequest) -> Self {
        let schedule = request.schedule.as_ref();
        Self {
            schedule_id,
            sync_type: request.sync_type.clone(),
            service_pairs: request.service_pairs.clone(),
            enabled: schedule.is_some_and(|s| s.enabled),
            frequency_secs: schedule.map_or(0, |s| s.frequency.as_secs()),
            next_run: schedule.and_then(|s| s.next_run),
        }
    }
}

/// One job in the status listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub sync_type: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<ScheduleId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<&SyncJobRecord> for JobSummary {
    fn from(record: &SyncJobRecord) -> Self {
        Self {
            job_id: record.id,
            sync_type: record.sync_type.clone(),
            status: record.status,
            priority: record.priority,
            requested_by: record.requested_by.clone(),
            schedule_id: record.schedule_id,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error_message: record.error_message.clone(),
            retry_count: record.retry_count,
            next_retry_at: record.next_retry_at,
        }
    }
}

/// Answer to the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    /// Most recent first.
    pub recent_jobs: Vec<JobSummary>,
    pub stats: JobStats,
    pub schedules: Vec<ScheduleSummary>,
}

/// A job together with its persisted result, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: JobSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CrossServiceSyncResult>,
}

/// A freshly connected service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub service: String,
    pub profile: UserProfile,
}
