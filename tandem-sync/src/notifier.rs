//! Completion hooks.
//!
//! The executor calls the notifier after a job's final record is persisted.
//! Notifier failures are logged and never change the job outcome.

use async_trait::async_trait;
use tandem_types::{CrossServiceSyncResult, SyncJobRecord};
use tracing::info;

use crate::error::Result;

/// Receives finished jobs.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `result` is `None` when the job failed and a retry is scheduled.
    async fn job_finished(
        &self,
        record: &SyncJobRecord,
        result: Option<&CrossServiceSyncResult>,
    ) -> Result<()>;
}

/// Writes a structured log line per finished job.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn job_finished(
        &self,
        record: &SyncJobRecord,
        result: Option<&CrossServiceSyncResult>,
    ) -> Result<()> {
        info!(
            job_id = %record.id,
            user_id = %record.user_id,
            status = %record.status,
            items_synced = result.map_or(0, |r| r.total_items_synced),
            items_failed = result.map_or(0, |r| r.total_items_failed),
            retry_at = ?record.next_retry_at,
            "Sync job finished"
        );
        Ok(())
    }
}
