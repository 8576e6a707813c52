//! Schedule bookkeeping, the periodic tick and the retry sweep.

mod common;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{job, options, Harness, USER};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tandem_storage::{JobRepository, ScheduleRepository};
use tandem_sync::{JobQueue, Scheduler, SyncError, TickReport, RETRY_REQUESTER, SCHEDULER_REQUESTER};
use tandem_types::{
    ConflictPolicy, JobStatus, Priority, ScheduleId, ServicePair, SyncJobRecord, SyncJobRequest,
    SyncMode, SyncSchedule,
};
use tokio_util::sync::CancellationToken;

const TEN_MINUTES: Duration = Duration::from_secs(600);

fn scheduled(user: &str, schedule: SyncSchedule) -> SyncJobRequest {
    SyncJobRequest::new(
        user,
        vec![ServicePair::new("spotify", "deezer", SyncMode::SyncFrom)],
        "tracks",
        options(ConflictPolicy::Skip, false),
    )
    .with_schedule(schedule)
}

fn due_at(next_run: DateTime<Utc>) -> SyncSchedule {
    SyncSchedule {
        next_run: Some(next_run),
        ..SyncSchedule::every(TEN_MINUTES)
    }
}

fn next_run(scheduler: &Scheduler, id: ScheduleId) -> DateTime<Utc> {
    scheduler
        .get(id)
        .and_then(|r| r.schedule)
        .and_then(|s| s.next_run)
        .unwrap()
}

fn setup(capacity: usize) -> (Harness, Arc<JobQueue>, Scheduler) {
    let h = Harness::new();
    let queue = Arc::new(JobQueue::new(capacity));
    let scheduler = Scheduler::new(h.dyn_store(), Arc::clone(&queue), h.config.clone());
    (h, queue, scheduler)
}

// ── Saving schedules ────────────────────────────────────────────

#[tokio::test]
async fn schedule_computes_first_run_from_frequency() {
    let (h, _queue, scheduler) = setup(10);
    let before = Utc::now();

    let id = scheduler
        .schedule(scheduled(USER, SyncSchedule::every(TEN_MINUTES)))
        .await
        .unwrap();

    let next = next_run(&scheduler, id);
    assert!(next >= before + ChronoDuration::minutes(10));
    assert!(next <= Utc::now() + ChronoDuration::minutes(10));

    let stored = h.store.get_schedule(id).unwrap().unwrap();
    assert!(stored.request.is_scheduled);
    assert_eq!(stored.request.schedule.unwrap().next_run, Some(next));
}

#[tokio::test]
async fn frequency_below_ten_minutes_is_rejected() {
    let (h, _queue, scheduler) = setup(10);

    let err = scheduler
        .schedule(scheduled(USER, SyncSchedule::every(Duration::from_secs(9 * 60))))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert!(scheduler.is_empty());
    assert!(h.store.list_schedules().unwrap().is_empty());
}

#[tokio::test]
async fn request_without_schedule_is_rejected() {
    let (_h, _queue, scheduler) = setup(10);
    let plain = SyncJobRequest::new(
        USER,
        vec![ServicePair::new("spotify", "deezer", SyncMode::SyncFrom)],
        "tracks",
        options(ConflictPolicy::Skip, false),
    );

    let err = scheduler.schedule(plain).await.unwrap_err();
    assert!(matches!(err, SyncError::ScheduleConfigInvalid(_)));
}

#[tokio::test]
async fn rescheduling_same_user_and_type_keeps_the_id() {
    let (h, _queue, scheduler) = setup(10);

    let first = scheduler
        .schedule(scheduled(USER, SyncSchedule::every(TEN_MINUTES)))
        .await
        .unwrap();
    let second = scheduler
        .schedule(scheduled(USER, SyncSchedule::every(Duration::from_secs(3600))))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(scheduler.len(), 1);
    assert_eq!(h.store.list_schedules().unwrap().len(), 1);
}

#[tokio::test]
async fn disable_enable_and_change_frequency() {
    let (_h, _queue, scheduler) = setup(10);
    let id = scheduler
        .schedule(scheduled(USER, SyncSchedule::every(TEN_MINUTES)))
        .await
        .unwrap();
    let far_future = Utc::now() + ChronoDuration::days(1);

    let disabled = scheduler.disable_schedule(id).await.unwrap();
    assert!(!disabled.schedule.unwrap().enabled);
    assert_eq!(scheduler.due_count(far_future), 0);

    let enabled = scheduler.enable_schedule(id).await.unwrap();
    assert!(enabled.schedule.unwrap().enabled);
    assert_eq!(scheduler.due_count(far_future), 1);

    let err = scheduler
        .update_schedule_frequency(id, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let before = Utc::now();
    let hourly = scheduler
        .update_schedule_frequency(id, Duration::from_secs(3600))
        .await
        .unwrap()
        .schedule
        .unwrap();
    assert_eq!(hourly.frequency, Duration::from_secs(3600));
    assert!(hourly.next_run.unwrap() >= before + ChronoDuration::hours(1));
}

#[tokio::test]
async fn unknown_schedule_ids_are_not_found() {
    let (_h, _queue, scheduler) = setup(10);
    let missing = ScheduleId::new();

    assert!(matches!(
        scheduler.unschedule(missing).await,
        Err(SyncError::ScheduleNotFound(_))
    ));
    assert!(matches!(
        scheduler.disable_schedule(missing).await,
        Err(SyncError::ScheduleNotFound(_))
    ));
}

#[tokio::test]
async fn unschedule_removes_from_memory_and_storage() {
    let (h, _queue, scheduler) = setup(10);
    let id = scheduler
        .schedule(scheduled(USER, SyncSchedule::every(TEN_MINUTES)))
        .await
        .unwrap();

    scheduler.unschedule(id).await.unwrap();

    assert!(scheduler.get(id).is_none());
    assert!(h.store.get_schedule(id).unwrap().is_none());
}

// ── Startup ─────────────────────────────────────────────────────

#[tokio::test]
async fn load_skips_elapsed_schedules_until_reconciled() {
    let (h, _queue, scheduler) = setup(10);
    let now = Utc::now();
    let ahead = h
        .store
        .upsert_schedule(ScheduleId::new(), &scheduled("bob", due_at(now + ChronoDuration::minutes(5))))
        .unwrap();
    let elapsed = h
        .store
        .upsert_schedule(ScheduleId::new(), &scheduled("carol", due_at(now - ChronoDuration::hours(3))))
        .unwrap();
    let mut off = due_at(now - ChronoDuration::hours(3));
    off.enabled = false;
    let disabled = h
        .store
        .upsert_schedule(ScheduleId::new(), &scheduled("dave", off))
        .unwrap();

    assert_eq!(scheduler.load(now).await.unwrap(), 1);
    assert!(scheduler.get(ahead).is_some());
    assert!(scheduler.get(elapsed).is_none());

    assert_eq!(scheduler.reconcile_elapsed(now).await.unwrap(), 1);
    assert_eq!(next_run(&scheduler, elapsed), now + ChronoDuration::minutes(10));
    assert!(scheduler.get(disabled).is_none());

    // Re-armed, not fired.
    assert_eq!(scheduler.due_count(now), 0);
}

// ── Ticks ───────────────────────────────────────────────────────

#[tokio::test]
async fn due_schedule_is_enqueued_and_advanced() {
    let (_h, queue, scheduler) = setup(10);
    let now = Utc::now();
    let id = scheduler
        .schedule(scheduled(USER, due_at(now - ChronoDuration::seconds(1))))
        .await
        .unwrap();

    let report = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!(
        report,
        TickReport {
            due: 1,
            enqueued: 1,
            deferred: 0,
            retried: 0,
        }
    );

    let fired = queue.dequeue().await.unwrap();
    assert_eq!(fired.schedule_id, Some(id));
    assert_eq!(fired.priority, Priority::Low);
    assert_eq!(fired.requested_by, SCHEDULER_REQUESTER);
    assert_eq!(next_run(&scheduler, id), now + ChronoDuration::minutes(10));

    let again = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!(again.due, 0);
}

#[tokio::test]
async fn full_queue_defers_schedules_to_a_later_tick() {
    let (h, queue, scheduler) = setup(5);
    for _ in 0..3 {
        queue
            .try_enqueue(job(scheduled(USER, SyncSchedule::every(TEN_MINUTES))))
            .unwrap();
    }

    let now = Utc::now();
    let mut ids = Vec::new();
    for i in 0..5 {
        let user = format!("user-{i}");
        let since = now - ChronoDuration::minutes(i + 1);
        ids.push((
            scheduler.schedule(scheduled(&user, due_at(since))).await.unwrap(),
            since,
        ));
    }

    let report = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!((report.due, report.enqueued, report.deferred), (5, 2, 3));
    assert_eq!(queue.len(), 5);

    // Oldest first: users 4 and 3 fired, the rest keep their next run.
    for (index, (id, since)) in ids.iter().enumerate() {
        let expected = if index >= 3 {
            now + ChronoDuration::minutes(10)
        } else {
            *since
        };
        assert_eq!(next_run(&scheduler, *id), expected);
        let stored = h.store.get_schedule(*id).unwrap().unwrap();
        assert_eq!(stored.request.schedule.unwrap().next_run, Some(expected));
    }

    while !queue.is_empty() {
        queue.dequeue().await;
    }
    let later = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!((later.due, later.enqueued, later.deferred), (3, 3, 0));
}

#[tokio::test]
async fn closed_queue_ends_the_tick() {
    let (_h, queue, scheduler) = setup(5);
    let now = Utc::now();
    scheduler
        .schedule(scheduled(USER, due_at(now - ChronoDuration::seconds(1))))
        .await
        .unwrap();
    queue.close();

    let err = scheduler.check_scheduled_syncs(now).await.unwrap_err();
    assert!(matches!(err, SyncError::QueueClosed));
}

#[tokio::test]
async fn run_loop_fires_due_schedules_until_shutdown() {
    let (_h, queue, scheduler) = setup(5);
    let scheduler = Arc::new(scheduler);
    scheduler
        .schedule(scheduled(USER, due_at(Utc::now() - ChronoDuration::seconds(1))))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));

    let fired = tokio::time::timeout(Duration::from_secs(5), queue.dequeue())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fired.requested_by, SCHEDULER_REQUESTER);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

// ── Retry sweep ─────────────────────────────────────────────────

fn failed_record(h: &Harness, retry_at: DateTime<Utc>) -> SyncJobRecord {
    let now = Utc::now();
    let mut record = SyncJobRecord::pending(
        &job(scheduled(USER, SyncSchedule::every(TEN_MINUTES))),
        3,
        now,
    );
    record.transition(JobStatus::Running, now).unwrap();
    record.transition(JobStatus::Failed, now).unwrap();
    record.error_message = Some("upstream unavailable".to_string());
    record.next_retry_at = Some(retry_at);
    h.store.insert_job(&record).unwrap();
    record
}

#[tokio::test]
async fn due_retries_are_resubmitted_once() {
    let (h, queue, scheduler) = setup(5);
    let now = Utc::now();
    let due = failed_record(&h, now - ChronoDuration::seconds(1));
    let pending = failed_record(&h, now + ChronoDuration::minutes(5));

    let report = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!(report.retried, 1);

    let resubmitted = queue.dequeue().await.unwrap();
    assert_eq!(resubmitted.job_id, due.id);
    assert_eq!(resubmitted.priority, Priority::Medium);
    assert_eq!(resubmitted.requested_by, RETRY_REQUESTER);
    assert!(h.store.get_job(due.id).unwrap().unwrap().next_retry_at.is_none());
    assert!(h.store.get_job(pending.id).unwrap().unwrap().next_retry_at.is_some());

    let again = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!(again.retried, 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn retry_that_finds_the_queue_full_stays_due() {
    let (h, queue, scheduler) = setup(1);
    let now = Utc::now();
    let due_time = now - ChronoDuration::seconds(1);
    let record = failed_record(&h, due_time);
    queue
        .try_enqueue(job(scheduled(USER, SyncSchedule::every(TEN_MINUTES))))
        .unwrap();

    let report = scheduler.check_scheduled_syncs(now).await.unwrap();
    assert_eq!(report.retried, 0);
    assert_eq!(
        h.store.get_job(record.id).unwrap().unwrap().next_retry_at,
        Some(due_time)
    );
}
