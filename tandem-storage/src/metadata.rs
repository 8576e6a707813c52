use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tandem_types::UserId;

use crate::error::StorageResult;
use crate::repository::{MetadataRepository, MetadataUpdate, SyncMetadata};
use crate::sqlite::{parse_opt_ts, parse_ts, ts, SqliteStore};

impl MetadataRepository for SqliteStore {
    fn get_metadata(
        &self,
        user_service_id: &str,
        external_id: &str,
        item_type: &str,
    ) -> StorageResult<Option<SyncMetadata>> {
        let row = self
            .conn()
            .query_row(
                "SELECT checksum, last_modified, last_sync_at, sync_count FROM sync_metadata
                 WHERE user_service_id = ?1 AND external_id = ?2 AND item_type = ?3",
                params![user_service_id, external_id, item_type],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((checksum, last_modified, last_sync_at, sync_count)) = row else {
            return Ok(None);
        };
        Ok(Some(SyncMetadata {
            user_service_id: user_service_id.to_string(),
            external_id: external_id.to_string(),
            item_type: item_type.to_string(),
            checksum,
            last_modified: parse_opt_ts(last_modified)?,
            last_sync_at: parse_ts(&last_sync_at)?,
            sync_count,
        }))
    }

    fn upsert_metadata_batch(&self, updates: &[MetadataUpdate]) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sync_metadata
                    (user_service_id, external_id, item_type, checksum, last_modified, last_sync_at, sync_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
                 ON CONFLICT(user_service_id, external_id, item_type) DO UPDATE SET
                    checksum = excluded.checksum,
                    last_modified = COALESCE(excluded.last_modified, sync_metadata.last_modified),
                    last_sync_at = excluded.last_sync_at,
                    sync_count = sync_metadata.sync_count + 1",
            )?;
            for u in updates {
                stmt.execute(params![
                    u.user_service_id,
                    u.external_id,
                    u.item_type,
                    u.checksum,
                    u.last_modified.map(ts),
                    ts(u.synced_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn last_pair_sync(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT last_sync_at FROM pair_cursors
                 WHERE user_id = ?1 AND from_service = ?2 AND to_service = ?3",
                params![user_id.as_str(), from, to],
                |row| row.get(0),
            )
            .optional()?;
        parse_opt_ts(raw)
    }

    fn record_pair_sync(
        &self,
        user_id: &UserId,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO pair_cursors (user_id, from_service, to_service, last_sync_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, from_service, to_service) DO UPDATE SET
                last_sync_at = excluded.last_sync_at",
            params![user_id.as_str(), from, to, ts(at)],
        )?;
        Ok(())
    }
}
