//! Recurring sync schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Error;

/// Smallest allowed interval between two runs of the same schedule.
pub const MIN_SCHEDULE_FREQUENCY: Duration = Duration::from_secs(10 * 60);

/// Recurrence settings attached to a scheduled `SyncJobRequest`.
///
/// Owned by the scheduler once submitted; callers never mutate it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSchedule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between runs, serialized as whole seconds.
    #[serde(rename = "frequency_secs", with = "duration_secs")]
    pub frequency: Duration,
    /// Next time the schedule is due. Computed on submission when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl SyncSchedule {
    /// Creates an enabled schedule with no explicit next run.
    pub fn every(frequency: Duration) -> Self {
        Self {
            enabled: true,
            frequency,
            next_run: None,
        }
    }

    /// Checks the frequency against the given minimum.
    pub fn validate_frequency(frequency: Duration, minimum: Duration) -> Result<(), Error> {
        if frequency < minimum {
            return Err(Error::Validation(format!(
                "schedule frequency must be at least {} minutes, got {}s",
                minimum.as_secs() / 60,
                frequency.as_secs()
            )));
        }
        Ok(())
    }

    /// Returns `from + frequency`.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let step = chrono::Duration::from_std(self.frequency).unwrap_or(chrono::Duration::MAX);
        from.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns true if the schedule is enabled and its next run is at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|next| next <= now)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
