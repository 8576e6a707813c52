//! Outcome records aggregated by the executor.
//!
//! A job produces one `CrossServiceSyncResult`, which holds a
//! `ServicePairResult` per requested pair, which in turn holds a `SyncResult`
//! per direction actually run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, UserId};
use crate::job::JobStatus;
use crate::request::SyncMode;

/// A single item that could not be synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub external_id: String,
    pub item_type: String,
    pub message: String,
}

/// Counts for one direction of one pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub from_service: String,
    pub to_service: String,
    /// Source items considered after type filtering.
    pub items_processed: u32,
    /// Items created on the target (planned creations when `dry_run`).
    pub items_added: u32,
    /// Items written over an existing target item.
    pub items_updated: u32,
    /// Matched items left alone because the policy is `skip`.
    pub items_matched_skipped: u32,
    /// Matched items whose content already agrees with the target.
    pub items_unchanged: u32,
    /// Upstream deletions, which are never propagated.
    pub items_skipped: u32,
    pub items_failed: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
    pub dry_run: bool,
}

impl SyncResult {
    pub fn new(from_service: impl Into<String>, to_service: impl Into<String>, dry_run: bool) -> Self {
        Self {
            from_service: from_service.into(),
            to_service: to_service.into(),
            dry_run,
            ..Default::default()
        }
    }

    /// Items that ended in agreement between the two services.
    pub fn items_synced(&self) -> u32 {
        self.items_added + self.items_updated + self.items_unchanged
    }

    /// Records a per-item failure without aborting the direction.
    pub fn record_failure(
        &mut self,
        external_id: impl Into<String>,
        item_type: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.items_failed += 1;
        self.errors.push(ItemError {
            external_id: external_id.into(),
            item_type: item_type.into(),
            message: message.into(),
        });
    }
}

/// Outcome of one requested pair across all its directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePairResult {
    pub source_service: String,
    pub target_service: String,
    pub sync_mode: SyncMode,
    pub success: bool,
    pub directions: Vec<SyncResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ServicePairResult {
    pub fn items_synced(&self) -> u32 {
        self.directions.iter().map(SyncResult::items_synced).sum()
    }

    pub fn items_failed(&self) -> u32 {
        self.directions.iter().map(|d| d.items_failed).sum()
    }
}

/// Immutable record of a finished job, keyed by job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossServiceSyncResult {
    pub job_id: JobId,
    pub user_id: UserId,
    pub sync_type: String,
    pub status: JobStatus,
    pub pair_results: Vec<ServicePairResult>,
    pub total_items_synced: u32,
    pub total_items_failed: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CrossServiceSyncResult {
    /// Builds the aggregate from finished pair results.
    #[allow(clippy::too_many_arguments)]
    pub fn aggregate(
        job_id: JobId,
        user_id: UserId,
        sync_type: impl Into<String>,
        status: JobStatus,
        pair_results: Vec<ServicePairResult>,
        mut errors: Vec<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let total_items_synced = pair_results.iter().map(ServicePairResult::items_synced).sum();
        let total_items_failed = pair_results.iter().map(ServicePairResult::items_failed).sum();
        for pair in &pair_results {
            if let Some(err) = &pair.error {
                errors.push(format!(
                    "{} / {}: {err}",
                    pair.source_service, pair.target_service
                ));
            }
        }
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            job_id,
            user_id,
            sync_type: sync_type.into(),
            status,
            pair_results,
            total_items_synced,
            total_items_failed,
            errors,
            started_at,
            completed_at,
            duration_ms,
        }
    }

    /// Returns true if every pair finished successfully.
    pub fn all_pairs_succeeded(&self) -> bool {
        self.pair_results.iter().all(|p| p.success)
    }
}
