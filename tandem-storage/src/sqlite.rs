//! SQLite-backed implementation of every repository trait.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_crypto::TokenCipher;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Persistent store backed by a single SQLite connection.
///
/// Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    pub(crate) cipher: TokenCipher,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>, cipher: TokenCipher) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened sqlite store");
        Self::with_connection(conn, cipher)
    }

    /// Opens an in-memory store (for testing and local runs).
    pub fn open_in_memory(cipher: TokenCipher) -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, cipher)
    }

    fn with_connection(conn: Connection, cipher: TokenCipher) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                frequency_secs INTEGER NOT NULL,
                next_run TEXT,
                request TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, sync_type)
            );

            CREATE TABLE IF NOT EXISTS sync_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                schedule_id TEXT,
                request TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sync_jobs_user ON sync_jobs(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_sync_jobs_retry ON sync_jobs(status, next_retry_at);

            CREATE TABLE IF NOT EXISTS sync_results (
                job_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                result TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_metadata (
                user_service_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                item_type TEXT NOT NULL,
                checksum TEXT NOT NULL,
                last_modified TEXT,
                last_sync_at TEXT NOT NULL,
                sync_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY(user_service_id, external_id, item_type)
            );

            CREATE TABLE IF NOT EXISTS pair_cursors (
                user_id TEXT NOT NULL,
                from_service TEXT NOT NULL,
                to_service TEXT NOT NULL,
                last_sync_at TEXT NOT NULL,
                PRIMARY KEY(user_id, from_service, to_service)
            );

            CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT NOT NULL,
                service TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                scope TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY(user_id, service)
            );
            ",
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ── Column codecs ────────────────────────────────────────────────

/// Fixed-width RFC 3339 in UTC, so text order equals time order.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}
