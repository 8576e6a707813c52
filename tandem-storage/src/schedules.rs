use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tandem_types::{ScheduleId, SyncJobRequest, UserId};

use crate::error::{StorageError, StorageResult};
use crate::repository::{ScheduleRepository, StoredSchedule};
use crate::sqlite::{ts, SqliteStore};

const SELECT: &str = "SELECT id, request FROM schedules";

fn decode(id: &str, request: &str) -> StorageResult<StoredSchedule> {
    let id = ScheduleId::parse(id)
        .map_err(|e| StorageError::InvalidData(format!("bad schedule id '{id}': {e}")))?;
    Ok(StoredSchedule {
        id,
        request: serde_json::from_str(request)?,
    })
}

impl SqliteStore {
    fn query_schedules(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<StoredSchedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|(id, req)| decode(id, req)).collect()
    }
}

impl ScheduleRepository for SqliteStore {
    fn upsert_schedule(&self, id: ScheduleId, request: &SyncJobRequest) -> StorageResult<ScheduleId> {
        let schedule = request
            .schedule
            .as_ref()
            .ok_or_else(|| StorageError::InvalidData("request carries no schedule".into()))?;
        let body = serde_json::to_string(request)?;

        let conn = self.conn();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM schedules WHERE user_id = ?1 AND sync_type = ?2",
                params![request.user_id.as_str(), request.sync_type],
                |row| row.get(0),
            )
            .optional()?;

        let effective = match existing {
            Some(raw) => ScheduleId::parse(&raw)
                .map_err(|e| StorageError::InvalidData(format!("bad schedule id '{raw}': {e}")))?,
            None => id,
        };

        conn.execute(
            "INSERT INTO schedules
                (id, user_id, sync_type, enabled, frequency_secs, next_run, request, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, sync_type) DO UPDATE SET
                enabled = excluded.enabled,
                frequency_secs = excluded.frequency_secs,
                next_run = excluded.next_run,
                request = excluded.request,
                updated_at = excluded.updated_at",
            params![
                effective.to_string(),
                request.user_id.as_str(),
                request.sync_type,
                schedule.enabled,
                schedule.frequency.as_secs() as i64,
                schedule.next_run.map(ts),
                body,
                ts(Utc::now()),
            ],
        )?;
        Ok(effective)
    }

    fn delete_schedule(&self, id: ScheduleId) -> StorageResult<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM schedules WHERE id = ?1", params![id.to_string()])?;
        Ok(n > 0)
    }

    fn get_schedule(&self, id: ScheduleId) -> StorageResult<Option<StoredSchedule>> {
        Ok(self
            .query_schedules(&format!("{SELECT} WHERE id = ?1"), params![id.to_string()])?
            .pop())
    }

    fn find_schedule(&self, user_id: &UserId, sync_type: &str) -> StorageResult<Option<StoredSchedule>> {
        Ok(self
            .query_schedules(
                &format!("{SELECT} WHERE user_id = ?1 AND sync_type = ?2"),
                params![user_id.as_str(), sync_type],
            )?
            .pop())
    }

    fn load_active_schedules(&self, now: DateTime<Utc>) -> StorageResult<Vec<StoredSchedule>> {
        self.query_schedules(
            &format!("{SELECT} WHERE enabled = 1 AND next_run IS NOT NULL AND next_run > ?1 ORDER BY next_run, id"),
            params![ts(now)],
        )
    }

    fn list_schedules(&self) -> StorageResult<Vec<StoredSchedule>> {
        self.query_schedules(&format!("{SELECT} ORDER BY user_id, sync_type"), [])
    }
}
