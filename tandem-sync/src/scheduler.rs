//! Recurring schedules and the periodic tick.
//!
//! The scheduler is the only writer of schedule state. Mutations follow a
//! snapshot-then-release pattern: an async persist lock serialises writers,
//! the in-memory map is read to build the updated schedule, the update is
//! written to storage with no map lock held, and the map is updated only
//! after the write succeeded. Storage is therefore authoritative after a
//! crash.
//!
//! Schedules whose `next_run` already passed when the process starts are
//! not loaded by [`Scheduler::load`]; [`Scheduler::reconcile_elapsed`]
//! re-arms them one period ahead without firing them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tandem_storage::Store;
use tandem_types::{
    CrossServiceSyncRequest, Priority, ScheduleId, SyncJobRequest, SyncSchedule, UserId,
};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::blocking::with_store;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::queue::JobQueue;

/// Requester recorded on jobs fired by a schedule.
pub const SCHEDULER_REQUESTER: &str = "system";
/// Requester recorded on re-submitted failed jobs.
pub const RETRY_REQUESTER: &str = "retry";

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Schedules that were due.
    pub due: usize,
    pub enqueued: usize,
    /// Due schedules left for a later tick because the queue was full.
    pub deferred: usize,
    /// Failed jobs re-submitted for another attempt.
    pub retried: usize,
}

/// Owner of all recurring schedule state.
pub struct Scheduler {
    store: Arc<dyn Store>,
    queue: Arc<JobQueue>,
    config: SyncConfig,
    schedules: RwLock<HashMap<ScheduleId, SyncJobRequest>>,
    persist: Mutex<()>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, queue: Arc<JobQueue>, config: SyncConfig) -> Self {
        Self {
            store,
            queue,
            config,
            schedules: RwLock::new(HashMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// Loads enabled schedules whose next run is still ahead of `now`.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<usize> {
        let _persist = self.persist.lock().await;
        let active = with_store(&self.store, move |s| s.load_active_schedules(now)).await?;
        let count = active.len();
        let mut schedules = self.write();
        for stored in active {
            schedules.insert(stored.id, stored.request);
        }
        info!(count, "Loaded active schedules");
        Ok(count)
    }

    /// Re-arms enabled schedules that elapsed while the process was down.
    ///
    /// Each one moves to `now + frequency` and is not fired now.
    pub async fn reconcile_elapsed(&self, now: DateTime<Utc>) -> Result<usize> {
        let _persist = self.persist.lock().await;
        let all = with_store(&self.store, |s| s.list_schedules()).await?;

        let mut rearmed = 0;
        for stored in all {
            let mut request = stored.request;
            let Some(schedule) = request.schedule.as_mut() else {
                continue;
            };
            if !schedule.enabled || schedule.next_run.is_some_and(|next| next > now) {
                continue;
            }
            schedule.next_run = Some(schedule.next_after(now));
            self.persist_and_commit(stored.id, request).await?;
            rearmed += 1;
        }
        if rearmed > 0 {
            info!(count = rearmed, "Re-armed elapsed schedules");
        }
        Ok(rearmed)
    }

    /// Creates or replaces the schedule for the request's `(user, sync_type)`.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, sync_type = %request.sync_type))]
    pub async fn schedule(&self, mut request: SyncJobRequest) -> Result<ScheduleId> {
        let Some(schedule) = request.schedule.as_mut() else {
            return Err(SyncError::ScheduleConfigInvalid(
                "request has no schedule".to_string(),
            ));
        };
        SyncSchedule::validate_frequency(schedule.frequency, self.config.min_schedule_frequency())?;
        if schedule.next_run.is_none() {
            schedule.next_run = Some(schedule.next_after(Utc::now()));
        }
        request.is_scheduled = true;

        let _persist = self.persist.lock().await;
        let row = request.clone();
        let id = with_store(&self.store, move |s| s.upsert_schedule(ScheduleId::new(), &row)).await?;
        self.write().insert(id, request);
        info!(schedule_id = %id, "Schedule saved");
        Ok(id)
    }

    pub async fn unschedule(&self, id: ScheduleId) -> Result<()> {
        let _persist = self.persist.lock().await;
        let removed = with_store(&self.store, move |s| s.delete_schedule(id)).await?;
        let was_loaded = self.write().remove(&id).is_some();
        if !removed && !was_loaded {
            return Err(SyncError::ScheduleNotFound(id.to_string()));
        }
        info!(schedule_id = %id, "Schedule removed");
        Ok(())
    }

    /// Enables a schedule; its next run becomes `now + frequency`.
    pub async fn enable_schedule(&self, id: ScheduleId) -> Result<SyncJobRequest> {
        self.modify(id, |schedule| {
            schedule.enabled = true;
            schedule.next_run = Some(schedule.next_after(Utc::now()));
            Ok(())
        })
        .await
    }

    pub async fn disable_schedule(&self, id: ScheduleId) -> Result<SyncJobRequest> {
        self.modify(id, |schedule| {
            schedule.enabled = false;
            Ok(())
        })
        .await
    }

    /// Changes the frequency and recomputes the next run.
    pub async fn update_schedule_frequency(
        &self,
        id: ScheduleId,
        frequency: Duration,
    ) -> Result<SyncJobRequest> {
        let minimum = self.config.min_schedule_frequency();
        self.modify(id, move |schedule| {
            SyncSchedule::validate_frequency(frequency, minimum)?;
            schedule.frequency = frequency;
            schedule.next_run = Some(schedule.next_after(Utc::now()));
            Ok(())
        })
        .await
    }

    /// The loaded copy of a schedule, if any.
    pub fn get(&self, id: ScheduleId) -> Option<SyncJobRequest> {
        self.read().get(&id).cloned()
    }

    /// Looks a schedule up in storage by its natural key.
    pub async fn find(
        &self,
        user_id: &UserId,
        sync_type: &str,
    ) -> Result<Option<(ScheduleId, SyncJobRequest)>> {
        let (user, sync_type) = (user_id.clone(), sync_type.to_string());
        let stored = with_store(&self.store, move |s| s.find_schedule(&user, &sync_type)).await?;
        Ok(stored.map(|s| (s.id, s.request)))
    }

    /// Every stored schedule belonging to `user_id`.
    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<(ScheduleId, SyncJobRequest)>> {
        let all = with_store(&self.store, |s| s.list_schedules()).await?;
        Ok(all
            .into_iter()
            .filter(|s| &s.request.user_id == user_id)
            .map(|s| (s.id, s.request))
            .collect())
    }

    /// Number of schedules held in memory.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedules that would fire at `now`.
    pub fn due_count(&self, now: DateTime<Utc>) -> usize {
        self.read()
            .values()
            .filter(|r| r.schedule.as_ref().is_some_and(|s| s.is_due(now)))
            .count()
    }

    /// Fires every due schedule and re-submits due retries.
    ///
    /// Enqueueing never waits. A schedule that finds the queue full keeps
    /// its `next_run` and fires on a later tick. A fired schedule advances
    /// to `now + frequency` and is persisted right away.
    pub async fn check_scheduled_syncs(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let _persist = self.persist.lock().await;

        let mut due: Vec<(ScheduleId, SyncJobRequest)> = self
            .read()
            .iter()
            .filter(|(_, r)| r.schedule.as_ref().is_some_and(|s| s.is_due(now)))
            .map(|(id, r)| (*id, r.clone()))
            .collect();
        due.sort_by_key(|(id, r)| (r.schedule.as_ref().and_then(|s| s.next_run), *id));

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for (id, request) in due {
            let job = CrossServiceSyncRequest::new(request.clone(), Priority::Low, SCHEDULER_REQUESTER)
                .for_schedule(id);
            let job_id = job.job_id;
            match self.queue.try_enqueue(job) {
                Ok(()) => {}
                Err(SyncError::QueueFull) => {
                    report.deferred += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            report.enqueued += 1;
            debug!(schedule_id = %id, %job_id, "Scheduled sync enqueued");

            let mut advanced = request;
            if let Some(schedule) = advanced.schedule.as_mut() {
                schedule.next_run = Some(schedule.next_after(now));
            }
            if let Err(e) = self.persist_and_commit(id, advanced).await {
                // The job is already queued; the schedule may fire once more.
                error!(schedule_id = %id, error = %e, "Failed to advance schedule");
            }
        }

        if report.deferred > 0 {
            warn!(
                deferred = report.deferred,
                enqueued = report.enqueued,
                "Job queue full, deferring scheduled syncs to the next tick"
            );
        }

        report.retried = self.resubmit_retries(now).await?;
        Ok(report)
    }

    /// Runs the tick loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.tick_interval();
        info!(tick_secs = period.as_secs(), "Scheduler started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.check_scheduled_syncs(Utc::now()).await {
                        Ok(report) if report.enqueued + report.retried > 0 => {
                            info!(
                                enqueued = report.enqueued,
                                deferred = report.deferred,
                                retried = report.retried,
                                "Scheduler tick"
                            );
                        }
                        Ok(_) => {}
                        Err(SyncError::QueueClosed) => break,
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// Re-submits failed jobs whose retry time has come.
    async fn resubmit_retries(&self, now: DateTime<Utc>) -> Result<usize> {
        let records = with_store(&self.store, move |s| s.retryable_jobs(now)).await?;

        let mut resubmitted = 0;
        for mut record in records {
            let due_at = record.next_retry_at.take();
            let claimed = record.clone();
            with_store(&self.store, move |s| s.update_job(&claimed)).await?;

            let job = CrossServiceSyncRequest {
                job_id: record.id,
                request: record.request.clone(),
                priority: Priority::Medium,
                requested_by: RETRY_REQUESTER.to_string(),
                schedule_id: record.schedule_id,
            };
            match self.queue.try_enqueue(job) {
                Ok(()) => {
                    resubmitted += 1;
                    debug!(job_id = %record.id, attempt = record.retry_count + 1, "Retry enqueued");
                }
                Err(e) => {
                    record.next_retry_at = due_at;
                    with_store(&self.store, move |s| s.update_job(&record)).await?;
                    if matches!(e, SyncError::QueueFull) {
                        break;
                    }
                    return Err(e);
                }
            }
        }
        Ok(resubmitted)
    }

    /// Applies `change` to a snapshot of the schedule, persists, then commits.
    async fn modify<F>(&self, id: ScheduleId, change: F) -> Result<SyncJobRequest>
    where
        F: FnOnce(&mut SyncSchedule) -> Result<()>,
    {
        let _persist = self.persist.lock().await;

        let loaded = self.read().get(&id).cloned();
        let mut request = match loaded {
            Some(request) => request,
            None => with_store(&self.store, move |s| s.get_schedule(id))
                .await?
                .map(|stored| stored.request)
                .ok_or_else(|| SyncError::ScheduleNotFound(id.to_string()))?,
        };
        let schedule = request
            .schedule
            .as_mut()
            .ok_or_else(|| SyncError::ScheduleConfigInvalid(format!("schedule {id} has no timing")))?;
        change(schedule)?;

        self.persist_and_commit(id, request.clone()).await?;
        info!(schedule_id = %id, "Schedule updated");
        Ok(request)
    }

    /// Writes `request` under `id` and mirrors it in memory on success.
    /// Callers hold the persist lock.
    async fn persist_and_commit(&self, id: ScheduleId, request: SyncJobRequest) -> Result<()> {
        let row = request.clone();
        with_store(&self.store, move |s| s.upsert_schedule(id, &row)).await?;
        self.write().insert(id, request);
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ScheduleId, SyncJobRequest>> {
        self.schedules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ScheduleId, SyncJobRequest>> {
        self.schedules.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("schedules", &self.len())
            .field("tick_interval", &self.config.tick_interval())
            .finish_non_exhaustive()
    }
}
