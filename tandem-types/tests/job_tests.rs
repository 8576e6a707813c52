use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::time::Duration;
use tandem_types::{
    CrossServiceSyncRequest, ItemType, JobId, JobStatus, OAuthTokens, Priority, ScheduleId,
    ServicePair, SyncJobRecord, SyncJobRequest, SyncMode, SyncOptions, SyncSchedule,
    MIN_SCHEDULE_FREQUENCY,
};

fn envelope() -> CrossServiceSyncRequest {
    let req = SyncJobRequest::new(
        "user-1",
        vec![ServicePair::new("spotify", "deezer", SyncMode::SyncFrom)],
        "tracks",
        SyncOptions::default(),
    );
    CrossServiceSyncRequest::new(req, Priority::Medium, "user-1")
}

// ── Ids ──────────────────────────────────────────────────────────

#[test]
fn job_ids_are_unique_and_parse_back() {
    let a = JobId::new();
    let b = JobId::new();
    assert_ne!(a, b);
    assert_eq!(JobId::parse(&a.to_string()).unwrap(), a);
    assert!(JobId::parse("not-a-uuid").is_err());
}

#[test]
fn schedule_ids_hash_and_eq() {
    let id = ScheduleId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
    assert_eq!(id.to_string().parse::<ScheduleId>().unwrap(), id);
}

// ── Status machine ───────────────────────────────────────────────

#[test]
fn allowed_transitions() {
    assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
    assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
    assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
    assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));
}

#[test]
fn forbidden_transitions() {
    assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
    assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
    assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
}

#[test]
fn status_string_roundtrip() {
    for status in [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
    }
}

#[test]
fn record_walks_lifecycle() {
    let now = Utc::now();
    let mut record = SyncJobRecord::pending(&envelope(), 3, now);
    assert_eq!(record.status, JobStatus::Pending);

    record.transition(JobStatus::Running, now).unwrap();
    assert_eq!(record.started_at, Some(now));

    let later = now + ChronoDuration::seconds(5);
    record.transition(JobStatus::Completed, later).unwrap();
    assert_eq!(record.completed_at, Some(later));
    assert!(record.status.is_terminal());

    assert!(record.transition(JobStatus::Running, later).is_err());
}

#[test]
fn failed_record_can_be_reopened_for_retry() {
    let now = Utc::now();
    let mut record = SyncJobRecord::pending(&envelope(), 2, now);
    record.transition(JobStatus::Running, now).unwrap();
    record.transition(JobStatus::Failed, now).unwrap();
    record.next_retry_at = Some(now);
    assert!(record.retry_available());

    record.transition(JobStatus::Pending, now).unwrap();
    assert!(record.next_retry_at.is_none());
    assert!(record.started_at.is_none());
}

#[test]
fn retry_limit_is_respected() {
    let now = Utc::now();
    let mut record = SyncJobRecord::pending(&envelope(), 1, now);
    record.status = JobStatus::Failed;
    record.retry_count = 1;
    assert!(!record.retry_available());
}

// ── Schedules ────────────────────────────────────────────────────

#[test]
fn frequency_below_minimum_is_rejected() {
    assert!(SyncSchedule::validate_frequency(Duration::from_secs(9 * 60), MIN_SCHEDULE_FREQUENCY).is_err());
    assert!(SyncSchedule::validate_frequency(Duration::from_secs(10 * 60), MIN_SCHEDULE_FREQUENCY).is_ok());
}

#[test]
fn schedule_due_only_when_enabled_and_elapsed() {
    let now = Utc::now();
    let mut schedule = SyncSchedule::every(Duration::from_secs(600));
    assert!(!schedule.is_due(now));

    schedule.next_run = Some(now - ChronoDuration::seconds(1));
    assert!(schedule.is_due(now));

    schedule.enabled = false;
    assert!(!schedule.is_due(now));
}

#[test]
fn next_after_adds_frequency() {
    let now = Utc::now();
    let schedule = SyncSchedule::every(Duration::from_secs(600));
    assert_eq!(schedule.next_after(now), now + ChronoDuration::minutes(10));
}

// ── Items & tokens ───────────────────────────────────────────────

#[test]
fn item_type_parses_plural_forms() {
    assert_eq!("tracks".parse::<ItemType>().unwrap(), ItemType::Track);
    assert_eq!("Playlist".parse::<ItemType>().unwrap(), ItemType::Playlist);
    assert!("podcast".parse::<ItemType>().is_err());
}

#[test]
fn tokens_expiry() {
    let now = Utc::now();
    let tokens = OAuthTokens::new("abc").with_expiry(now - ChronoDuration::seconds(1));
    assert!(tokens.is_expired_at(now));
    assert!(!tokens.can_refresh());

    let forever = OAuthTokens::new("abc").with_refresh_token("r");
    assert!(!forever.is_expired_at(now));
    assert!(forever.can_refresh());
}

#[test]
fn tokens_debug_is_redacted() {
    let tokens = OAuthTokens::new("secret-access").with_refresh_token("secret-refresh");
    let debug = format!("{tokens:?}");
    assert!(!debug.contains("secret-access"));
    assert!(!debug.contains("secret-refresh"));
    assert!(debug.contains("REDACTED"));
}
