//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the queue, workers, scheduler and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent job executions.
    pub worker_count: usize,
    /// Maximum number of queued, not yet running jobs.
    pub queue_capacity: usize,
    /// How often the scheduler looks for due schedules.
    pub tick_interval_secs: u64,
    /// How long a manual request may wait for a free queue slot.
    pub manual_enqueue_timeout_ms: u64,
    /// Lower bound for recurring schedule frequencies.
    pub min_schedule_frequency_secs: u64,
    /// Retries granted to a failed job.
    pub default_max_retries: u32,
    /// First retry delay; doubles with every attempt.
    pub retry_backoff_secs: u64,
    /// Jobs returned by the status query.
    pub recent_jobs_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 100,
            tick_interval_secs: 60,
            manual_enqueue_timeout_ms: 2_000,
            min_schedule_frequency_secs: 600,
            default_max_retries: 3,
            retry_backoff_secs: 300,
            recent_jobs_limit: 10,
        }
    }
}

impl SyncConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn manual_enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.manual_enqueue_timeout_ms)
    }

    pub fn min_schedule_frequency(&self) -> Duration {
        Duration::from_secs(self.min_schedule_frequency_secs)
    }

    /// Delay before retry number `attempt + 1`.
    pub fn retry_delay(&self, attempt: u32) -> chrono::Duration {
        let factor = 1u64 << attempt.min(16);
        let secs = self.retry_backoff_secs.saturating_mul(factor);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
