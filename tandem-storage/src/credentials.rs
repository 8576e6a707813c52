use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tandem_types::{OAuthTokens, UserId};

use crate::error::StorageResult;
use crate::repository::{CredentialRepository, SyncMetadata};
use crate::sqlite::{parse_opt_ts, ts, SqliteStore};

/// AEAD scope binding a token blob to its owner, service and kind.
fn scope(user_id: &UserId, service: &str, kind: &str) -> String {
    format!("{}:{kind}", SyncMetadata::user_service_id(user_id, service))
}

impl CredentialRepository for SqliteStore {
    fn save_tokens(&self, user_id: &UserId, service: &str, tokens: &OAuthTokens) -> StorageResult<()> {
        let access = self
            .cipher
            .encrypt_string(&scope(user_id, service, "access"), &tokens.access_token)?;
        let refresh = tokens
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| self.cipher.encrypt_string(&scope(user_id, service, "refresh"), t))
            .transpose()?;

        self.conn().execute(
            "INSERT INTO credentials
                (user_id, service, access_token, refresh_token, expires_at, scope, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, service) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at",
            params![
                user_id.as_str(),
                service,
                access,
                refresh,
                tokens.expires_at.map(ts),
                tokens.scope,
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn load_tokens(&self, user_id: &UserId, service: &str) -> StorageResult<Option<OAuthTokens>> {
        let row = self
            .conn()
            .query_row(
                "SELECT access_token, refresh_token, expires_at, scope FROM credentials
                 WHERE user_id = ?1 AND service = ?2",
                params![user_id.as_str(), service],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((access, refresh, expires_at, token_scope)) = row else {
            return Ok(None);
        };

        let access_token = self
            .cipher
            .decrypt_string(&scope(user_id, service, "access"), &access)?;
        let refresh_token = refresh
            .map(|blob| {
                self.cipher
                    .decrypt_string(&scope(user_id, service, "refresh"), &blob)
            })
            .transpose()?;

        Ok(Some(OAuthTokens {
            access_token,
            refresh_token,
            expires_at: parse_opt_ts(expires_at)?,
            scope: token_scope,
        }))
    }

    fn delete_tokens(&self, user_id: &UserId, service: &str) -> StorageResult<bool> {
        let n = self.conn().execute(
            "DELETE FROM credentials WHERE user_id = ?1 AND service = ?2",
            params![user_id.as_str(), service],
        )?;
        Ok(n > 0)
    }

    fn connected_services(&self, user_id: &UserId) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT service FROM credentials WHERE user_id = ?1 ORDER BY service")?;
        let services = stmt
            .query_map(params![user_id.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(services)
    }
}
