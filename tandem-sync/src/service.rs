//! The engine's request/response surface.
//!
//! [`SyncService`] validates requests, checks that the user connected every
//! service involved, and hands work to the queue or the scheduler. It never
//! runs a job inline: manual syncs are acknowledged once queued and their
//! outcome is read back through [`SyncService::get_sync_status`].

use std::sync::Arc;
use std::time::Duration;
use tandem_providers::{ServiceHealth, ServiceInfo, ServiceRegistry};
use tandem_storage::Store;
use tandem_types::{
    CrossServiceSyncRequest, JobId, JobStatus, Priority, ScheduleId, ServicePair, SyncJobRequest,
    SyncOptions, SyncSchedule, UserId,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::blocking::with_store;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::notifier::Notifier;
use crate::queue::JobQueue;
use crate::scheduler::Scheduler;
use crate::status::{
    ConnectionInfo, JobDetail, JobSummary, ManualSyncAccepted, ScheduleAccepted, ScheduleSummary,
    ScheduleUpdate, SyncStatusReport,
};
use crate::worker::WorkerPool;

/// Background tasks started by [`SyncService::start`].
pub struct EngineHandle {
    shutdown: CancellationToken,
    scheduler: JoinHandle<()>,
    workers: WorkerPool,
}

impl EngineHandle {
    /// Stops the scheduler tick, then lets in-flight jobs finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.scheduler.await {
            error!(error = %e, "Scheduler task panicked");
        }
        self.workers.shutdown().await;
    }
}

/// Entry point for callers of the sync engine.
pub struct SyncService {
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn Store>,
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
    executor: Arc<SyncExecutor>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            config.clone(),
        ));
        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            notifier,
            config.clone(),
        ));
        Self {
            registry,
            store,
            queue,
            scheduler,
            executor,
            config,
        }
    }

    /// Spawns the worker pool and the scheduler loop.
    pub fn start(&self, shutdown: CancellationToken) -> EngineHandle {
        let workers = WorkerPool::spawn(
            self.config.worker_count,
            Arc::clone(&self.queue),
            Arc::clone(&self.executor),
        );
        let scheduler = tokio::spawn(Arc::clone(&self.scheduler).run(shutdown.clone()));
        EngineHandle {
            shutdown,
            scheduler,
            workers,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn executor(&self) -> &Arc<SyncExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ── Core operations ─────────────────────────────────────────

    /// Queues a one-off sync. Waits a bounded time for a queue slot.
    #[instrument(skip(self, service_pairs, sync_options), fields(user_id = %user_id))]
    pub async fn initiate_manual_sync(
        &self,
        user_id: UserId,
        service_pairs: Vec<ServicePair>,
        sync_type: String,
        sync_options: SyncOptions,
    ) -> Result<ManualSyncAccepted> {
        let mut request = SyncJobRequest::new(user_id, service_pairs, sync_type, sync_options);
        request.validate()?;
        self.ensure_connected(&request).await?;

        let description = describe(&request);
        let total_directions = request.total_directions();
        let requested_by = request.user_id.to_string();
        let job = CrossServiceSyncRequest::new(request, Priority::High, requested_by);
        let job_id = job.job_id;

        self.queue
            .enqueue_timeout(job, self.config.manual_enqueue_timeout())
            .await?;
        info!(%job_id, total_directions, "Manual sync queued");

        Ok(ManualSyncAccepted {
            accepted: true,
            job_id,
            description,
            total_directions,
        })
    }

    /// Saves a recurring sync for the user's `sync_type`, replacing any
    /// existing one.
    #[instrument(skip(self, service_pairs, sync_options, schedule), fields(user_id = %user_id))]
    pub async fn schedule_auto_sync(
        &self,
        user_id: UserId,
        service_pairs: Vec<ServicePair>,
        sync_type: String,
        sync_options: SyncOptions,
        schedule: SyncSchedule,
    ) -> Result<ScheduleAccepted> {
        SyncSchedule::validate_frequency(schedule.frequency, self.config.min_schedule_frequency())?;
        let mut request = SyncJobRequest::new(user_id, service_pairs, sync_type, sync_options)
            .with_schedule(schedule);
        request.validate()?;
        self.ensure_connected(&request).await?;

        let schedule_id = self.scheduler.schedule(request).await?;
        let next_run = self
            .scheduler
            .get(schedule_id)
            .and_then(|r| r.schedule)
            .and_then(|s| s.next_run);

        Ok(ScheduleAccepted {
            accepted: true,
            schedule_id,
            next_run,
        })
    }

    /// Recent jobs, aggregate counters and schedules of a user.
    pub async fn get_sync_status(&self, user_id: &UserId) -> Result<SyncStatusReport> {
        let limit = self.config.recent_jobs_limit;
        let user = user_id.clone();
        let (jobs, stats) = with_store(&self.store, move |s| {
            Ok((s.recent_jobs(&user, limit)?, s.job_stats(&user)?))
        })
        .await?;

        let schedules = self
            .scheduler
            .list_for_user(user_id)
            .await?
            .iter()
            .map(|(id, request)| ScheduleSummary::new(*id, request))
            .collect();

        Ok(SyncStatusReport {
            recent_jobs: jobs.iter().map(JobSummary::from).collect(),
            stats,
            schedules,
        })
    }

    /// Every same-category pair of registered services in every mode.
    pub fn get_supported_pairs(&self) -> Vec<ServicePair> {
        self.registry.supported_pairs()
    }

    /// Toggles and/or re-times the user's schedule for `sync_type`.
    pub async fn update_schedule(
        &self,
        user_id: &UserId,
        sync_type: &str,
        update: ScheduleUpdate,
    ) -> Result<ScheduleSummary> {
        if update.is_empty() {
            return Err(SyncError::Validation(
                "update must set enabled or frequency_secs".to_string(),
            ));
        }
        let (id, mut request) = self.find_schedule(user_id, sync_type).await?;

        if let Some(secs) = update.frequency_secs {
            request = self
                .scheduler
                .update_schedule_frequency(id, Duration::from_secs(secs))
                .await?;
        }
        match update.enabled {
            Some(true) => request = self.scheduler.enable_schedule(id).await?,
            Some(false) => request = self.scheduler.disable_schedule(id).await?,
            None => {}
        }
        Ok(ScheduleSummary::new(id, &request))
    }

    pub async fn delete_schedule(&self, user_id: &UserId, sync_type: &str) -> Result<()> {
        let (id, _) = self.find_schedule(user_id, sync_type).await?;
        self.scheduler.unschedule(id).await
    }

    // ── Jobs ────────────────────────────────────────────────────

    pub async fn get_job(&self, user_id: &UserId, job_id: JobId) -> Result<JobDetail> {
        let (record, result) = with_store(&self.store, move |s| {
            Ok((s.get_job(job_id)?, s.get_result(job_id)?))
        })
        .await?;

        match record {
            Some(record) if &record.user_id == user_id => Ok(JobDetail {
                job: JobSummary::from(&record),
                result,
            }),
            _ => Err(SyncError::JobNotFound(job_id.to_string())),
        }
    }

    /// Cancels one of the user's running jobs.
    pub async fn cancel_job(&self, user_id: &UserId, job_id: JobId) -> Result<()> {
        let detail = self.get_job(user_id, job_id).await?;
        if detail.job.status == JobStatus::Running && self.executor.cancel(job_id) {
            return Ok(());
        }
        Err(SyncError::JobNotCancellable {
            job_id: job_id.to_string(),
            status: detail.job.status.to_string(),
        })
    }

    // ── Services & connections ──────────────────────────────────

    pub fn list_services(&self) -> Vec<ServiceInfo> {
        self.registry.list_services()
    }

    pub async fn health_report(&self) -> Vec<ServiceHealth> {
        self.registry.health_report(&CancellationToken::new()).await
    }

    pub async fn connected_services(&self, user_id: &UserId) -> Result<Vec<String>> {
        let user = user_id.clone();
        with_store(&self.store, move |s| s.connected_services(&user)).await
    }

    /// URL the user visits to grant access to `service`.
    pub fn connect_url(&self, service: &str, state: &str, redirect_url: &str) -> Result<String> {
        let provider = self
            .registry
            .get(service)
            .map_err(|_| SyncError::ServiceUnavailable(service.to_string()))?;
        Ok(provider.auth_url(state, redirect_url))
    }

    /// Exchanges an authorization code and stores the resulting tokens.
    #[instrument(skip(self, code, redirect_url), fields(user_id = %user_id))]
    pub async fn complete_connection(
        &self,
        user_id: &UserId,
        service: &str,
        code: &str,
        redirect_url: &str,
    ) -> Result<ConnectionInfo> {
        let provider = self
            .registry
            .get(service)
            .map_err(|_| SyncError::ServiceUnavailable(service.to_string()))?;

        let tokens = provider.exchange_code(code, redirect_url).await?;
        let profile = provider
            .user_profile(&CancellationToken::new(), &tokens)
            .await?;

        let (user, name) = (user_id.clone(), service.to_string());
        with_store(&self.store, move |s| s.save_tokens(&user, &name, &tokens)).await?;
        info!(service, account = %profile.id, "Service connected");

        Ok(ConnectionInfo {
            service: service.to_string(),
            profile,
        })
    }

    /// Forgets the user's tokens for `service`. Returns false if none were stored.
    pub async fn disconnect_service(&self, user_id: &UserId, service: &str) -> Result<bool> {
        let (user, name) = (user_id.clone(), service.to_string());
        let removed = with_store(&self.store, move |s| s.delete_tokens(&user, &name)).await?;
        if removed {
            info!(user_id = %user_id, service, "Service disconnected");
        }
        Ok(removed)
    }

    async fn ensure_connected(&self, request: &SyncJobRequest) -> Result<()> {
        let connected = self.connected_services(&request.user_id).await?;
        for pair in &request.service_pairs {
            for service in [&pair.source_service, &pair.target_service] {
                if !self.registry.is_service_available(service) {
                    return Err(SyncError::ServiceUnavailable(service.clone()));
                }
                if !connected.contains(service) {
                    return Err(SyncError::ServiceNotConnected {
                        service: service.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn find_schedule(
        &self,
        user_id: &UserId,
        sync_type: &str,
    ) -> Result<(ScheduleId, SyncJobRequest)> {
        self.scheduler
            .find(user_id, sync_type)
            .await?
            .ok_or_else(|| SyncError::ScheduleNotFound(format!("{user_id}/{sync_type}")))
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("registry", &self.registry)
            .field("queue", &self.queue)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

fn describe(request: &SyncJobRequest) -> String {
    let pairs: Vec<String> = request
        .service_pairs
        .iter()
        .map(|p| format!("{} -> {} ({})", p.source_service, p.target_service, p.sync_mode))
        .collect();
    format!("sync {}: {}", request.sync_type, pairs.join(", "))
}
