//! Shared fixtures for sync engine tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_crypto::{TokenCipher, TokenKey};
use tandem_providers::{InMemoryProvider, ServiceCategory, ServiceProvider, ServiceRegistry};
use tandem_storage::{
    CredentialRepository, JobRepository, JobStats, MetadataRepository, MetadataUpdate,
    ScheduleRepository, SqliteStore, StorageError, StorageResult, Store, StoredSchedule,
    SyncMetadata,
};
use tandem_sync::{SyncConfig, SyncExecutor, TracingNotifier};
use tandem_types::{
    ConflictPolicy, CrossServiceSyncRequest, CrossServiceSyncResult, ItemAction, JobId,
    OAuthTokens, Priority, ScheduleId, ServicePair, SyncItem, SyncJobRecord, SyncJobRequest,
    SyncMode, SyncOptions, UserId,
};

pub const USER: &str = "alice";

/// Two in-memory music services wired to a fresh store.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub registry: Arc<ServiceRegistry>,
    pub spotify: Arc<InMemoryProvider>,
    pub deezer: Arc<InMemoryProvider>,
    pub config: SyncConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_providers(
            InMemoryProvider::new("spotify", ServiceCategory::Music),
            InMemoryProvider::new("deezer", ServiceCategory::Music),
            config,
        )
    }

    pub fn with_providers(
        spotify: InMemoryProvider,
        deezer: InMemoryProvider,
        config: SyncConfig,
    ) -> Self {
        let store = Arc::new(
            SqliteStore::open_in_memory(TokenCipher::new(&TokenKey::generate())).unwrap(),
        );
        let registry = Arc::new(ServiceRegistry::new());
        let spotify = Arc::new(spotify);
        let deezer = Arc::new(deezer);
        registry.register(spotify.clone() as Arc<dyn ServiceProvider>).unwrap();
        registry.register(deezer.clone() as Arc<dyn ServiceProvider>).unwrap();
        Self {
            store,
            registry,
            spotify,
            deezer,
            config,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Stores non-expiring tokens for `USER` on both services.
    pub fn connect_both(&self) {
        self.connect("spotify", OAuthTokens::new(USER));
        self.connect("deezer", OAuthTokens::new(USER));
    }

    pub fn connect(&self, service: &str, tokens: OAuthTokens) {
        self.store
            .save_tokens(&UserId::new(USER), service, &tokens)
            .unwrap();
    }

    pub fn executor(&self) -> SyncExecutor {
        SyncExecutor::new(
            self.registry.clone(),
            self.dyn_store(),
            Arc::new(TracingNotifier),
            self.config.clone(),
        )
    }

    /// Executor over a store whose cursor reads can be made to fail.
    pub fn flaky_executor(&self) -> (Arc<FlakyStore>, SyncExecutor) {
        let flaky = Arc::new(FlakyStore::new(self.store.clone()));
        let executor = SyncExecutor::new(
            self.registry.clone(),
            flaky.clone() as Arc<dyn Store>,
            Arc::new(TracingNotifier),
            self.config.clone(),
        );
        (flaky, executor)
    }
}

pub fn track(id: &str, title: &str, artist: &str) -> SyncItem {
    SyncItem::new(
        id,
        "track",
        ItemAction::Create,
        json!({"title": title, "artists": [artist]}),
    )
}

pub fn track_on_album(id: &str, title: &str, artist: &str, album: &str) -> SyncItem {
    SyncItem::new(
        id,
        "track",
        ItemAction::Create,
        json!({"title": title, "artists": [artist], "album": {"name": album}}),
    )
}

pub fn options(policy: ConflictPolicy, dry_run: bool) -> SyncOptions {
    SyncOptions {
        conflict_policy: policy,
        match_threshold: 0.8,
        dry_run,
    }
}

pub fn request(mode: SyncMode, options: SyncOptions) -> SyncJobRequest {
    SyncJobRequest::new(
        USER,
        vec![ServicePair::new("spotify", "deezer", mode)],
        "tracks",
        options,
    )
}

pub fn job(request: SyncJobRequest) -> CrossServiceSyncRequest {
    CrossServiceSyncRequest::new(request, Priority::Medium, USER)
}

pub fn service(h: &Harness) -> tandem_sync::SyncService {
    tandem_sync::SyncService::new(
        h.registry.clone(),
        h.dyn_store(),
        Arc::new(TracingNotifier),
        h.config.clone(),
    )
}

// ── Flaky store ─────────────────────────────────────────────────

/// Wraps a store and, while armed, fails every cursor read.
pub struct FlakyStore {
    inner: Arc<SqliteStore>,
    fail_cursor_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_cursor_reads: AtomicBool::new(false),
        }
    }

    pub fn fail_cursor_reads(&self, fail: bool) {
        self.fail_cursor_reads.store(fail, Ordering::SeqCst);
    }
}

impl ScheduleRepository for FlakyStore {
    fn upsert_schedule(&self, id: ScheduleId, request: &SyncJobRequest) -> StorageResult<ScheduleId> {
        self.inner.upsert_schedule(id, request)
    }

    fn delete_schedule(&self, id: ScheduleId) -> StorageResult<bool> {
        self.inner.delete_schedule(id)
    }

    fn get_schedule(&self, id: ScheduleId) -> StorageResult<Option<StoredSchedule>> {
        self.inner.get_schedule(id)
    }

    fn find_schedule(&self, user_id: &UserId, sync_type: &str) -> StorageResult<Option<StoredSchedule>> {
        self.inner.find_schedule(user_id, sync_type)
    }

    fn load_active_schedules(&self, now: DateTime<Utc>) -> StorageResult<Vec<StoredSchedule>> {
        self.inner.load_active_schedules(now)
    }

    fn list_schedules(&self) -> StorageResult<Vec<StoredSchedule>> {
        self.inner.list_schedules()
    }
}

impl JobRepository for FlakyStore {
    fn insert_job(&self, record: &SyncJobRecord) -> StorageResult<()> {
        self.inner.insert_job(record)
    }

    fn update_job(&self, record: &SyncJobRecord) -> StorageResult<()> {
        self.inner.update_job(record)
    }

    fn get_job(&self, id: JobId) -> StorageResult<Option<SyncJobRecord>> {
        self.inner.get_job(id)
    }

    fn recent_jobs(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<SyncJobRecord>> {
        self.inner.recent_jobs(user_id, limit)
    }

    fn retryable_jobs(&self, now: DateTime<Utc>) -> StorageResult<Vec<SyncJobRecord>> {
        self.inner.retryable_jobs(now)
    }

    fn save_result(&self, result: &CrossServiceSyncResult) -> StorageResult<()> {
        self.inner.save_result(result)
    }

    fn get_result(&self, job_id: JobId) -> StorageResult<Option<CrossServiceSyncResult>> {
        self.inner.get_result(job_id)
    }

    fn complete_job(
        &self,
        record: &SyncJobRecord,
        result: Option<&CrossServiceSyncResult>,
    ) -> StorageResult<()> {
        self.inner.complete_job(record, result)
    }

    fn job_stats(&self, user_id: &UserId) -> StorageResult<JobStats> {
        self.inner.job_stats(user_id)
    }
}

impl MetadataRepository for FlakyStore {
    fn get_metadata(
        &self,
        user_service_id: &str,
        external_id: &str,
        item_type: &str,
    ) -> StorageResult<Option<SyncMetadata>> {
        self.inner.get_metadata(user_service_id, external_id, item_type)
    }

    fn upsert_metadata_batch(&self, updates: &[MetadataUpdate]) -> StorageResult<()> {
        self.inner.upsert_metadata_batch(updates)
    }

    fn last_pair_sync(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        if self.fail_cursor_reads.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidData("cursor table unavailable".to_string()));
        }
        self.inner.last_pair_sync(user_id, from, to)
    }

    fn record_pair_sync(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.inner.record_pair_sync(user_id, from, to, at)
    }
}

impl CredentialRepository for FlakyStore {
    fn save_tokens(&self, user_id: &UserId, service: &str, tokens: &OAuthTokens) -> StorageResult<()> {
        self.inner.save_tokens(user_id, service, tokens)
    }

    fn load_tokens(&self, user_id: &UserId, service: &str) -> StorageResult<Option<OAuthTokens>> {
        self.inner.load_tokens(user_id, service)
    }

    fn delete_tokens(&self, user_id: &UserId, service: &str) -> StorageResult<bool> {
        self.inner.delete_tokens(user_id, service)
    }

    fn connected_services(&self, user_id: &UserId) -> StorageResult<Vec<String>> {
        self.inner.connected_services(user_id)
    }
}
