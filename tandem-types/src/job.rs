//! Persisted job records and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{JobId, ScheduleId, UserId};
use crate::request::{CrossServiceSyncRequest, Priority, SyncJobRequest};
use crate::Error;

/// Lifecycle state of a sync job.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`. A failed job may
/// go back to `Pending` when it is re-submitted for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states a job never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::UnknownVariant {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

/// The persisted bookkeeping row for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobRecord {
    pub id: JobId,
    pub user_id: UserId,
    pub sync_type: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<ScheduleId>,
    pub request: SyncJobRequest,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl SyncJobRecord {
    /// Creates a pending record for a queued request.
    pub fn pending(job: &CrossServiceSyncRequest, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: job.job_id,
            user_id: job.request.user_id.clone(),
            sync_type: job.request.sync_type.clone(),
            status: JobStatus::Pending,
            priority: job.priority,
            requested_by: job.requested_by.clone(),
            schedule_id: job.schedule_id,
            request: job.request.clone(),
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
        }
    }

    /// Moves the record to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        match next {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Pending => {
                self.started_at = None;
                self.completed_at = None;
                self.next_retry_at = None;
            }
            _ => self.completed_at = Some(now),
        }
        self.status = next;
        Ok(())
    }

    /// Returns true if the job failed and may still be re-submitted.
    pub fn retry_available(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }
}
