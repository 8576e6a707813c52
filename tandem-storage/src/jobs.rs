use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tandem_types::{CrossServiceSyncResult, JobId, JobStatus, ScheduleId, SyncJobRecord, UserId};

use crate::error::{StorageError, StorageResult};
use crate::repository::{JobRepository, JobStats};
use crate::sqlite::{parse_opt_ts, parse_ts, ts, SqliteStore};

const COLUMNS: &str = "id, user_id, sync_type, status, priority, requested_by, schedule_id, request, \
                       created_at, started_at, completed_at, error_message, retry_count, max_retries, \
                       next_retry_at";

/// A job row as stored, before decoding.
struct RawJob {
    id: String,
    user_id: String,
    sync_type: String,
    status: String,
    priority: String,
    requested_by: String,
    schedule_id: Option<String>,
    request: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
    retry_count: u32,
    max_retries: u32,
    next_retry_at: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            sync_type: row.get(2)?,
            status: row.get(3)?,
            priority: row.get(4)?,
            requested_by: row.get(5)?,
            schedule_id: row.get(6)?,
            request: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
            error_message: row.get(11)?,
            retry_count: row.get(12)?,
            max_retries: row.get(13)?,
            next_retry_at: row.get(14)?,
        })
    }

    fn decode(self) -> StorageResult<SyncJobRecord> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            StorageError::InvalidData(format!("job {}: bad {what}: {e}", self.id))
        };
        Ok(SyncJobRecord {
            id: JobId::parse(&self.id).map_err(|e| invalid("id", &e))?,
            user_id: UserId::new(self.user_id.clone()),
            sync_type: self.sync_type.clone(),
            status: self.status.parse().map_err(|e| invalid("status", &e))?,
            priority: self.priority.parse().map_err(|e| invalid("priority", &e))?,
            requested_by: self.requested_by.clone(),
            schedule_id: self
                .schedule_id
                .as_deref()
                .map(ScheduleId::parse)
                .transpose()
                .map_err(|e| invalid("schedule id", &e))?,
            request: serde_json::from_str(&self.request)?,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at.clone())?,
            completed_at: parse_opt_ts(self.completed_at.clone())?,
            error_message: self.error_message.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            next_retry_at: parse_opt_ts(self.next_retry_at.clone())?,
        })
    }
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StorageResult<Vec<SyncJobRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, RawJob::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawJob::decode).collect()
}

fn write_update(conn: &Connection, record: &SyncJobRecord) -> StorageResult<()> {
    let n = conn.execute(
        "UPDATE sync_jobs SET
            status = ?2, priority = ?3, requested_by = ?4, request = ?5,
            started_at = ?6, completed_at = ?7, error_message = ?8,
            retry_count = ?9, max_retries = ?10, next_retry_at = ?11
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.status.as_str(),
            record.priority.to_string(),
            record.requested_by,
            serde_json::to_string(&record.request)?,
            record.started_at.map(ts),
            record.completed_at.map(ts),
            record.error_message,
            record.retry_count,
            record.max_retries,
            record.next_retry_at.map(ts),
        ],
    )?;
    if n == 0 {
        return Err(StorageError::NotFound(format!("job {}", record.id)));
    }
    Ok(())
}

fn write_result(conn: &Connection, result: &CrossServiceSyncResult) -> StorageResult<()> {
    let n = conn.execute(
        "INSERT INTO sync_results (job_id, user_id, result, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(job_id) DO NOTHING",
        params![
            result.job_id.to_string(),
            result.user_id.as_str(),
            serde_json::to_string(result)?,
            ts(result.completed_at),
        ],
    )?;
    if n == 0 {
        return Err(StorageError::Conflict(format!("result for job {}", result.job_id)));
    }
    Ok(())
}

impl JobRepository for SqliteStore {
    fn insert_job(&self, record: &SyncJobRecord) -> StorageResult<()> {
        let n = self.conn().execute(
            &format!(
                "INSERT INTO sync_jobs ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO NOTHING"
            ),
            params![
                record.id.to_string(),
                record.user_id.as_str(),
                record.sync_type,
                record.status.as_str(),
                record.priority.to_string(),
                record.requested_by,
                record.schedule_id.map(|s| s.to_string()),
                serde_json::to_string(&record.request)?,
                ts(record.created_at),
                record.started_at.map(ts),
                record.completed_at.map(ts),
                record.error_message,
                record.retry_count,
                record.max_retries,
                record.next_retry_at.map(ts),
            ],
        )?;
        if n == 0 {
            return Err(StorageError::Conflict(format!("job {}", record.id)));
        }
        Ok(())
    }

    fn update_job(&self, record: &SyncJobRecord) -> StorageResult<()> {
        write_update(&self.conn(), record)
    }

    fn get_job(&self, id: JobId) -> StorageResult<Option<SyncJobRecord>> {
        let conn = self.conn();
        Ok(query_jobs(
            &conn,
            &format!("SELECT {COLUMNS} FROM sync_jobs WHERE id = ?1"),
            params![id.to_string()],
        )?
        .pop())
    }

    fn recent_jobs(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<SyncJobRecord>> {
        let conn = self.conn();
        query_jobs(
            &conn,
            &format!(
                "SELECT {COLUMNS} FROM sync_jobs WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            params![user_id.as_str(), limit as i64],
        )
    }

    fn retryable_jobs(&self, now: DateTime<Utc>) -> StorageResult<Vec<SyncJobRecord>> {
        let conn = self.conn();
        query_jobs(
            &conn,
            &format!(
                "SELECT {COLUMNS} FROM sync_jobs
                 WHERE status = ?1 AND next_retry_at IS NOT NULL AND next_retry_at <= ?2
                   AND retry_count < max_retries
                 ORDER BY next_retry_at, id"
            ),
            params![JobStatus::Failed.as_str(), ts(now)],
        )
    }

    fn save_result(&self, result: &CrossServiceSyncResult) -> StorageResult<()> {
        write_result(&self.conn(), result)
    }

    fn get_result(&self, job_id: JobId) -> StorageResult<Option<CrossServiceSyncResult>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT result FROM sync_results WHERE job_id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| serde_json::from_str(&r).map_err(Into::into))
            .transpose()
    }

    fn complete_job(
        &self,
        record: &SyncJobRecord,
        result: Option<&CrossServiceSyncResult>,
    ) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        write_update(&tx, record)?;
        if let Some(result) = result {
            write_result(&tx, result)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn job_stats(&self, user_id: &UserId) -> StorageResult<JobStats> {
        let conn = self.conn();
        let mut stats = JobStats::default();

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM sync_jobs WHERE user_id = ?1 GROUP BY status")?;
        let counts = stmt
            .query_map(params![user_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, count) in counts {
            let count = count.max(0) as u64;
            stats.total_jobs += count;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending = count,
                Ok(JobStatus::Running) => stats.running = count,
                Ok(JobStatus::Completed) => stats.completed = count,
                Ok(JobStatus::Failed) => stats.failed = count,
                Ok(JobStatus::Cancelled) => stats.cancelled = count,
                Err(e) => return Err(StorageError::InvalidData(e.to_string())),
            }
        }

        let mut stmt = conn.prepare("SELECT result FROM sync_results WHERE user_id = ?1")?;
        let bodies = stmt
            .query_map(params![user_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for body in bodies {
            let result: CrossServiceSyncResult = serde_json::from_str(&body)?;
            stats.total_items_synced += u64::from(result.total_items_synced);
            stats.total_items_failed += u64::from(result.total_items_failed);
        }

        let last: Option<String> = conn.query_row(
            "SELECT MAX(completed_at) FROM sync_jobs WHERE user_id = ?1 AND status = ?2",
            params![user_id.as_str(), JobStatus::Completed.as_str()],
            |row| row.get(0),
        )?;
        stats.last_completed_at = parse_opt_ts(last)?;

        Ok(stats)
    }
}
