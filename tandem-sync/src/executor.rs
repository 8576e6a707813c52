//! Runs one sync job end to end.
//!
//! For every direction of every service pair the executor pulls the items
//! that changed on the source since the direction's cursor, pulls the whole
//! target library as the match pool, and then decides per source item:
//!
//! 1. no match above the threshold: create it on the target
//! 2. a match whose fingerprints on both sides equal the stored ones:
//!    count it unchanged
//! 3. otherwise: apply the job's conflict policy to the pair
//!
//! Item failures are recorded and the run continues. A pair whose adapter
//! or credentials are unusable fails alone. Authorization failures in the
//! middle of a run, storage failures and cancellation end the job.

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tandem_model::{
    find_best_match, matches_sync_type, resolve_conflict, transform_to_universal, ItemCapabilities,
    ModelError, Resolution, UniversalItem,
};
use tandem_providers::{
    ItemChange, ProviderError, ServiceProvider, ServiceRegistry,
};
use tandem_storage::{MetadataUpdate, Store, SyncMetadata};
use tandem_types::{
    CrossServiceSyncRequest, CrossServiceSyncResult, ItemAction, JobId, JobStatus, OAuthTokens,
    ServicePair, ServicePairResult, SyncJobRecord, SyncJobRequest, SyncOptions, SyncResult, UserId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::blocking::with_store;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::notifier::Notifier;

/// Final state of an executed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub record: SyncJobRecord,
    pub result: CrossServiceSyncResult,
    /// Whether `result` was persisted. Attempts that will be retried keep
    /// only the error on their record.
    pub result_persisted: bool,
}

/// Executes dequeued jobs against the registered adapters.
pub struct SyncExecutor {
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: SyncConfig,
    running: Mutex<HashMap<JobId, CancellationToken>>,
}

impl SyncExecutor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Requests cancellation of a running job. Returns false if the job is
    /// not running on this executor.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.running().get(&job_id) {
            Some(token) => {
                info!(%job_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.running().contains_key(&job_id)
    }

    pub fn running_count(&self) -> usize {
        self.running().len()
    }

    /// Runs `job` to a terminal state and persists the outcome.
    ///
    /// Returns `Ok(None)` when the job was already handled, for example a
    /// duplicate delivery of a finished job.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, user_id = %job.request.user_id))]
    pub async fn execute(&self, job: CrossServiceSyncRequest) -> Result<Option<JobReport>> {
        let Some(mut record) = self.open_record(&job).await? else {
            return Ok(None);
        };

        let cancel = CancellationToken::new();
        let _guard = RunningGuard::register(&self.running, job.job_id, cancel.clone());
        self.run(&mut record, &job.request, &cancel).await.map(Some)
    }

    async fn open_record(&self, job: &CrossServiceSyncRequest) -> Result<Option<SyncJobRecord>> {
        let job_id = job.job_id;
        let existing = with_store(&self.store, move |s| s.get_job(job_id)).await?;
        let now = Utc::now();

        match existing {
            None => {
                let record = SyncJobRecord::pending(job, self.config.default_max_retries, now);
                let row = record.clone();
                with_store(&self.store, move |s| s.insert_job(&row)).await?;
                Ok(Some(record))
            }
            Some(mut record) if record.retry_available() => {
                record.transition(JobStatus::Pending, now)?;
                record.retry_count += 1;
                record.error_message = None;
                info!(attempt = record.retry_count, "Retrying failed job");
                Ok(Some(record))
            }
            Some(record) if record.status == JobStatus::Pending => Ok(Some(record)),
            Some(record) => {
                warn!(status = %record.status, "Skipping job that is not runnable");
                Ok(None)
            }
        }
    }

    async fn run(
        &self,
        record: &mut SyncJobRecord,
        request: &SyncJobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let started_at = Utc::now();
        record.transition(JobStatus::Running, started_at)?;
        let row = record.clone();
        with_store(&self.store, move |s| s.update_job(&row)).await?;
        info!(
            pairs = request.service_pairs.len(),
            directions = request.total_directions(),
            dry_run = request.sync_options.dry_run,
            "Sync job started"
        );

        let mut pair_results = Vec::with_capacity(request.service_pairs.len());
        let outcome = self.run_pairs(request, cancel, &mut pair_results).await;
        let completed_at = Utc::now();

        let (status, errors) = match &outcome {
            Ok(()) => (JobStatus::Completed, Vec::new()),
            Err(SyncError::Cancelled) => (JobStatus::Cancelled, vec![SyncError::Cancelled.to_string()]),
            Err(e) => (JobStatus::Failed, vec![e.to_string()]),
        };
        record.transition(status, completed_at)?;
        record.error_message = outcome.as_ref().err().map(ToString::to_string);

        let result = CrossServiceSyncResult::aggregate(
            record.id,
            record.user_id.clone(),
            record.sync_type.clone(),
            status,
            pair_results,
            errors,
            started_at,
            completed_at,
        );

        let retry = record.retry_available()
            && outcome.as_ref().err().is_some_and(SyncError::is_transient);
        if retry {
            record.next_retry_at =
                completed_at.checked_add_signed(self.config.retry_delay(record.retry_count));
        }

        let row = record.clone();
        let persisted = (!retry).then(|| result.clone());
        with_store(&self.store, move |s| s.complete_job(&row, persisted.as_ref())).await?;

        match status {
            JobStatus::Completed => info!(
                items_synced = result.total_items_synced,
                items_failed = result.total_items_failed,
                duration_ms = result.duration_ms,
                "Sync job completed"
            ),
            _ => warn!(
                status = %status,
                error = record.error_message.as_deref().unwrap_or_default(),
                retry_at = ?record.next_retry_at,
                "Sync job did not complete"
            ),
        }

        let notified = if retry { None } else { Some(&result) };
        if let Err(e) = self.notifier.job_finished(record, notified).await {
            warn!(error = %e, "Job notifier failed");
        }

        Ok(JobReport {
            record: record.clone(),
            result,
            result_persisted: !retry,
        })
    }

    async fn run_pairs(
        &self,
        request: &SyncJobRequest,
        cancel: &CancellationToken,
        out: &mut Vec<ServicePairResult>,
    ) -> Result<()> {
        for pair in &request.service_pairs {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let started = Instant::now();
            let mut pair_result = ServicePairResult {
                source_service: pair.source_service.clone(),
                target_service: pair.target_service.clone(),
                sync_mode: pair.sync_mode,
                success: true,
                directions: Vec::new(),
                error: None,
                duration_ms: 0,
            };
            let outcome = self.run_pair(request, pair, cancel, &mut pair_result).await;
            pair_result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            if let Err(e) = outcome {
                pair_result.success = false;
                pair_result.error = Some(e.to_string());
                if is_fatal(&e) {
                    out.push(pair_result);
                    return Err(e);
                }
                warn!(
                    source = %pair.source_service,
                    target = %pair.target_service,
                    error = %e,
                    "Service pair failed"
                );
            }
            out.push(pair_result);
        }
        Ok(())
    }

    async fn run_pair(
        &self,
        request: &SyncJobRequest,
        pair: &ServicePair,
        cancel: &CancellationToken,
        out: &mut ServicePairResult,
    ) -> Result<()> {
        let source = self.adapter(&pair.source_service)?;
        let target = self.adapter(&pair.target_service)?;
        let source_tokens = self.credentials(&request.user_id, source.as_ref()).await?;
        let target_tokens = self.credentials(&request.user_id, target.as_ref()).await?;

        let mut failures = Vec::new();
        for direction in pair.directions() {
            let forward = direction.from == pair.source_service;
            let (from, from_tokens, to, to_tokens) = if forward {
                (&source, &source_tokens, &target, &target_tokens)
            } else {
                (&target, &target_tokens, &source, &source_tokens)
            };

            let mut run = DirectionRun::new(
                &self.store,
                cancel,
                &request.user_id,
                &request.sync_options,
                to.as_ref(),
                to_tokens,
                from.name(),
            );
            let outcome = run
                .execute(from.as_ref(), from_tokens, &request.sync_type)
                .await;
            out.directions.push(run.result);

            if let Err(e) = outcome {
                if is_fatal(&e) {
                    return Err(e);
                }
                warn!(%direction, error = %e, "Sync direction failed");
                failures.push(format!("{direction}: {e}"));
            }
        }

        if !failures.is_empty() {
            out.success = false;
            out.error = Some(failures.join("; "));
        }
        Ok(())
    }

    fn adapter(&self, service: &str) -> Result<Arc<dyn ServiceProvider>> {
        self.registry
            .get(service)
            .map_err(|_| SyncError::ServiceUnavailable(service.to_string()))
    }

    /// Loads the user's tokens for `provider`, refreshing expired ones.
    async fn credentials(&self, user_id: &UserId, provider: &dyn ServiceProvider) -> Result<OAuthTokens> {
        let service = provider.name().to_string();
        let (user, name) = (user_id.clone(), service.clone());
        let stored = with_store(&self.store, move |s| s.load_tokens(&user, &name)).await?;

        let Some(tokens) = stored else {
            return Err(SyncError::InvalidCredentials {
                service,
                reason: "service not connected".to_string(),
            });
        };
        if !tokens.is_expired_at(Utc::now()) {
            return Ok(tokens);
        }

        let Some(refresh_token) = tokens.refresh_token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(SyncError::InvalidCredentials {
                service,
                reason: "access token expired and no refresh token is stored".to_string(),
            });
        };
        let refreshed = provider
            .refresh_tokens(refresh_token)
            .await
            .map_err(|e| SyncError::InvalidCredentials {
                service: service.clone(),
                reason: e.to_string(),
            })?;

        debug!(%service, "Refreshed access token");
        let (user, name, row) = (user_id.clone(), service, refreshed.clone());
        with_store(&self.store, move |s| s.save_tokens(&user, &name, &row)).await?;
        Ok(refreshed)
    }

    fn running(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SyncExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncExecutor")
            .field("registry", &self.registry)
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

/// Errors that end the whole job rather than one pair.
fn is_fatal(err: &SyncError) -> bool {
    match err {
        SyncError::Provider(e) => e.is_auth(),
        SyncError::Cancelled | SyncError::Storage(_) | SyncError::Task(_) => true,
        _ => false,
    }
}

fn provider_error(err: ProviderError) -> SyncError {
    if err.is_cancelled() {
        SyncError::Cancelled
    } else {
        SyncError::Provider(err)
    }
}

/// Removes a job's cancellation token when its run ends.
struct RunningGuard<'a> {
    running: &'a Mutex<HashMap<JobId, CancellationToken>>,
    job_id: JobId,
}

impl<'a> RunningGuard<'a> {
    fn register(
        running: &'a Mutex<HashMap<JobId, CancellationToken>>,
        job_id: JobId,
        token: CancellationToken,
    ) -> Self {
        running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, token);
        Self { running, job_id }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

// ── One direction ───────────────────────────────────────────────

/// State of a single `from -> to` pass.
struct DirectionRun<'a> {
    store: &'a Arc<dyn Store>,
    cancel: &'a CancellationToken,
    user_id: &'a UserId,
    options: &'a SyncOptions,
    to: &'a dyn ServiceProvider,
    to_tokens: &'a OAuthTokens,
    from_key: String,
    to_key: String,
    pool: Vec<UniversalItem>,
    fingerprints: Vec<MetadataUpdate>,
    result: SyncResult,
}

impl<'a> DirectionRun<'a> {
    fn new(
        store: &'a Arc<dyn Store>,
        cancel: &'a CancellationToken,
        user_id: &'a UserId,
        options: &'a SyncOptions,
        to: &'a dyn ServiceProvider,
        to_tokens: &'a OAuthTokens,
        from: &str,
    ) -> Self {
        Self {
            store,
            cancel,
            user_id,
            options,
            to,
            to_tokens,
            from_key: SyncMetadata::user_service_id(user_id, from),
            to_key: SyncMetadata::user_service_id(user_id, to.name()),
            pool: Vec::new(),
            fingerprints: Vec::new(),
            result: SyncResult::new(from, to.name(), options.dry_run),
        }
    }

    async fn execute(
        &mut self,
        from: &dyn ServiceProvider,
        from_tokens: &OAuthTokens,
        sync_type: &str,
    ) -> Result<()> {
        let from_name = from.name().to_string();
        let to_name = self.to.name().to_string();

        let (user, f, t) = (self.user_id.clone(), from_name.clone(), to_name.clone());
        let since = with_store(self.store, move |s| s.last_pair_sync(&user, &f, &t)).await?;

        // Upstream timestamps have whole-second precision.
        let pull_started = Utc::now().trunc_subsecs(0);
        let pulled = from
            .sync_user_data(self.cancel, from_tokens, since)
            .await
            .map_err(provider_error)?;
        let existing = self
            .to
            .sync_user_data(self.cancel, self.to_tokens, None)
            .await
            .map_err(provider_error)?;

        self.pool = existing
            .items
            .iter()
            .filter_map(|raw| match transform_to_universal(&to_name, raw) {
                Ok(item) => Some(item),
                Err(e) => {
                    debug!(service = %to_name, error = %e, "Ignoring unreadable target item");
                    None
                }
            })
            .filter(|item| matches_sync_type(item.item_type(), sync_type))
            .collect();
        debug!(
            from = %from_name,
            to = %to_name,
            source_items = pulled.items.len(),
            pool = self.pool.len(),
            since = ?since,
            "Direction pulled"
        );

        let to_info = self.to.info();
        for raw in &pulled.items {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let item = match transform_to_universal(&from_name, raw) {
                Ok(item) => item,
                Err(ModelError::UnsupportedItemType { .. }) => {
                    debug!(item_type = %raw.item_type, "Skipping unsupported item kind");
                    continue;
                }
                Err(e) => {
                    self.result.items_processed += 1;
                    self.result
                        .record_failure(&raw.external_id, &raw.item_type, e.to_string());
                    continue;
                }
            };
            if !matches_sync_type(item.item_type(), sync_type) {
                continue;
            }

            self.result.items_processed += 1;
            if item.action() == ItemAction::Delete || !to_info.supports(item.item_type()) {
                self.result.items_skipped += 1;
                continue;
            }

            let found = find_best_match(&item, &self.pool, self.options.match_threshold);
            match (found.target, found.candidate_index) {
                (Some(target), Some(index)) => self.reconcile(&item, target, index).await?,
                _ => self.create(&item).await?,
            }
        }

        info!(
            from = %from_name,
            to = %to_name,
            processed = self.result.items_processed,
            added = self.result.items_added,
            updated = self.result.items_updated,
            unchanged = self.result.items_unchanged,
            failed = self.result.items_failed,
            dry_run = self.options.dry_run,
            "Direction finished"
        );

        if self.options.dry_run {
            return Ok(());
        }
        let fingerprints = std::mem::take(&mut self.fingerprints);
        // Failed items must be pulled again next time.
        let advance_cursor = self.result.items_failed == 0;
        let (user, f, t) = (self.user_id.clone(), from_name, to_name);
        with_store(self.store, move |s| {
            s.upsert_metadata_batch(&fingerprints)?;
            if advance_cursor {
                s.record_pair_sync(&user, &f, &t, pull_started)?;
            }
            Ok(())
        })
        .await
    }

    async fn create(&mut self, item: &UniversalItem) -> Result<()> {
        if self.options.dry_run {
            self.result.items_added += 1;
            self.pool.push(item.clone());
            return Ok(());
        }

        let change = ItemChange::Create(item.clone());
        let Some(outcome) = self.push(item, &change).await? else {
            return Ok(());
        };

        let created = item.with_identity(&outcome.external_id, self.to.name(), ItemAction::Create);
        let now = Utc::now();
        self.fingerprints.push(fingerprint(&self.from_key, item, now));
        self.fingerprints.push(fingerprint(&self.to_key, &created, now));
        self.pool.push(created);
        self.result.items_added += 1;
        Ok(())
    }

    async fn reconcile(&mut self, item: &UniversalItem, target: UniversalItem, index: usize) -> Result<()> {
        if self.fingerprints_unchanged(item, &target).await? {
            self.result.items_unchanged += 1;
            return Ok(());
        }

        let resolution = match resolve_conflict(self.options.conflict_policy, item, &target) {
            Ok(resolution) => resolution,
            Err(e) => {
                self.result
                    .record_failure(item.identifier(), item.item_type().as_str(), e.to_string());
                return Ok(());
            }
        };

        let now = Utc::now();
        match resolution {
            Resolution::Skip => self.result.items_matched_skipped += 1,
            Resolution::Unchanged => {
                self.result.items_unchanged += 1;
                if !self.options.dry_run {
                    self.fingerprints.push(fingerprint(&self.from_key, item, now));
                    self.fingerprints.push(fingerprint(&self.to_key, &target, now));
                }
            }
            Resolution::Write(resolved) => {
                if self.options.dry_run {
                    self.result.items_updated += 1;
                    return Ok(());
                }
                let change = ItemChange::Update(resolved.clone());
                if self.push(item, &change).await?.is_some() {
                    self.fingerprints.push(fingerprint(&self.from_key, item, now));
                    self.fingerprints.push(fingerprint(&self.to_key, &resolved, now));
                    self.pool[index] = resolved;
                    self.result.items_updated += 1;
                }
            }
        }
        Ok(())
    }

    /// Pushes a change. Item-level failures are recorded and yield `None`.
    async fn push(
        &mut self,
        item: &UniversalItem,
        change: &ItemChange,
    ) -> Result<Option<tandem_providers::PushOutcome>> {
        match self.to.push_item(self.cancel, self.to_tokens, change).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_cancelled() => Err(SyncError::Cancelled),
            Err(e) if e.is_auth() => Err(SyncError::Provider(e)),
            Err(e) => {
                debug!(item = %item.display_name(), error = %e, "Item push failed");
                self.result
                    .record_failure(item.identifier(), item.item_type().as_str(), e.to_string());
                Ok(None)
            }
        }
    }

    /// True when both sides still hash to the fingerprints of the last sync.
    async fn fingerprints_unchanged(&self, source: &UniversalItem, target: &UniversalItem) -> Result<bool> {
        let item_type = source.item_type().as_str();
        let lookups = [
            (self.from_key.clone(), source.identifier().to_string(), source.checksum()),
            (self.to_key.clone(), target.identifier().to_string(), target.checksum()),
        ];
        with_store(self.store, move |s| {
            for (key, external_id, checksum) in &lookups {
                match s.get_metadata(key, external_id, item_type)? {
                    Some(stored) if stored.checksum == *checksum => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        })
        .await
    }
}

fn fingerprint(user_service_id: &str, item: &UniversalItem, synced_at: DateTime<Utc>) -> MetadataUpdate {
    MetadataUpdate {
        user_service_id: user_service_id.to_string(),
        external_id: item.identifier().to_string(),
        item_type: item.item_type().as_str().to_string(),
        checksum: item.checksum(),
        last_modified: None,
        synced_at,
    }
}
