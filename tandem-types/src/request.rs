//! Sync requests as accepted from the API boundary or loaded from schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{JobId, ScheduleId, UserId};
use crate::schedule::SyncSchedule;
use crate::Error;

/// Match threshold applied when a request leaves it at zero.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;

/// Direction of data flow for a service pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Source to target.
    SyncFrom,
    /// Target to source.
    SyncTo,
    /// Source to target, then target to source.
    Bidirectional,
}

impl SyncMode {
    pub const ALL: [SyncMode; 3] = [SyncMode::SyncFrom, SyncMode::SyncTo, SyncMode::Bidirectional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncFrom => "sync-from",
            Self::SyncTo => "sync-to",
            Self::Bidirectional => "bidirectional",
        }
    }

    /// Number of directions a pair in this mode expands to.
    pub fn direction_count(&self) -> usize {
        match self {
            Self::Bidirectional => 2,
            Self::SyncFrom | Self::SyncTo => 1,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync-from" => Ok(Self::SyncFrom),
            "sync-to" => Ok(Self::SyncTo),
            "bidirectional" => Ok(Self::Bidirectional),
            other => Err(Error::UnknownVariant {
                kind: "sync mode",
                value: other.to_string(),
            }),
        }
    }
}

/// How a matched item is reconciled on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave the target untouched.
    #[default]
    Skip,
    /// Replace the target item with the source data.
    Overwrite,
    /// Combine fields, source wins for every non-empty field.
    Merge,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Overwrite => write!(f, "overwrite"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Dispatch priority of a queued job. Ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(Error::UnknownVariant {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// Two external services paired for synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServicePair {
    pub source_service: String,
    pub target_service: String,
    pub sync_mode: SyncMode,
}

/// One concrete flow of data between two services.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncDirection {
    pub from: String,
    pub to: String,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

impl ServicePair {
    pub fn new(
        source_service: impl Into<String>,
        target_service: impl Into<String>,
        sync_mode: SyncMode,
    ) -> Self {
        Self {
            source_service: source_service.into(),
            target_service: target_service.into(),
            sync_mode,
        }
    }

    /// Checks that both services are named and distinct.
    pub fn validate(&self) -> Result<(), Error> {
        if self.source_service.trim().is_empty() {
            return Err(Error::Validation("source_service is required".into()));
        }
        if self.target_service.trim().is_empty() {
            return Err(Error::Validation("target_service is required".into()));
        }
        if self.source_service == self.target_service {
            return Err(Error::Validation(format!(
                "source and target must differ (both are {})",
                self.source_service
            )));
        }
        Ok(())
    }

    /// Expands the pair into the directions implied by its mode, in processing order.
    pub fn directions(&self) -> Vec<SyncDirection> {
        let forward = SyncDirection {
            from: self.source_service.clone(),
            to: self.target_service.clone(),
        };
        let backward = SyncDirection {
            from: self.target_service.clone(),
            to: self.source_service.clone(),
        };
        match self.sync_mode {
            SyncMode::SyncFrom => vec![forward],
            SyncMode::SyncTo => vec![backward],
            SyncMode::Bidirectional => vec![forward, backward],
        }
    }
}

/// Per-request knobs for matching and conflict handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub conflict_policy: ConflictPolicy,
    /// Minimum confidence in `[0, 1]` for two items to be treated as the same.
    pub match_threshold: f64,
    /// Compute the outcome without writing to any target service.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Skip,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            dry_run: false,
        }
    }
}

/// A validated-on-entry request to synchronize one or more service pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobRequest {
    pub user_id: UserId,
    pub service_pairs: Vec<ServicePair>,
    pub sync_type: String,
    #[serde(default)]
    pub sync_options: SyncOptions,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<SyncSchedule>,
}

impl SyncJobRequest {
    /// Creates an unscheduled request stamped with the current time.
    pub fn new(
        user_id: impl Into<UserId>,
        service_pairs: Vec<ServicePair>,
        sync_type: impl Into<String>,
        sync_options: SyncOptions,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            service_pairs,
            sync_type: sync_type.into(),
            sync_options,
            requested_at: Utc::now(),
            is_scheduled: false,
            schedule: None,
        }
    }

    /// Attaches a schedule and marks the request as scheduled.
    #[must_use]
    pub fn with_schedule(mut self, schedule: SyncSchedule) -> Self {
        self.schedule = Some(schedule);
        self.is_scheduled = true;
        self
    }

    /// Fills zero-valued options with their defaults (threshold 0.8).
    pub fn apply_defaults(&mut self) {
        if self.sync_options.match_threshold == 0.0 {
            self.sync_options.match_threshold = DEFAULT_MATCH_THRESHOLD;
        }
    }

    /// Applies defaults, then checks every invariant of the request.
    pub fn validate(&mut self) -> Result<(), Error> {
        self.apply_defaults();

        if self.user_id.is_empty() {
            return Err(Error::Validation("user_id is required".into()));
        }
        if self.sync_type.trim().is_empty() {
            return Err(Error::Validation("sync_type is required".into()));
        }
        if self.service_pairs.is_empty() {
            return Err(Error::Validation(
                "at least one service pair is required".into(),
            ));
        }
        for pair in &self.service_pairs {
            pair.validate()?;
        }

        let threshold = self.sync_options.match_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(format!(
                "match_threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(())
    }

    /// Total number of sync directions across all pairs.
    pub fn total_directions(&self) -> usize {
        self.service_pairs
            .iter()
            .map(|p| p.sync_mode.direction_count())
            .sum()
    }
}

/// A request as it travels through the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossServiceSyncRequest {
    pub job_id: JobId,
    pub request: SyncJobRequest,
    pub priority: Priority,
    pub requested_by: String,
    /// Set when the job was fired by a schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<ScheduleId>,
}

impl CrossServiceSyncRequest {
    pub fn new(request: SyncJobRequest, priority: Priority, requested_by: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            request,
            priority,
            requested_by: requested_by.into(),
            schedule_id: None,
        }
    }

    #[must_use]
    pub fn for_schedule(mut self, schedule_id: ScheduleId) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }
}
