//! Deezer adapter.
//!
//! Deezer reports most errors inside a `200 OK` body as
//! `{"error": {"type", "message", "code"}}`, so every response is checked
//! for an error object before decoding. Access tokens are passed as a
//! query parameter and there are no refresh tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tandem_model::{ItemCapabilities, UniversalItem, UniversalTrack};
use tandem_types::{ItemAction, ItemType, OAuthTokens, SyncItem};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ProviderClient, TokenOp};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    ItemChange, PushOutcome, ServiceCategory, ServiceInfo, ServiceProvider, UserDataResult,
    UserProfile,
};
use crate::rate_limit::RateLimitConfig;

pub const SERVICE_NAME: &str = "deezer";

/// In-body error code for an invalid or expired token.
const ERROR_INVALID_TOKEN: i64 = 300;
/// In-body error code for an exceeded request quota.
const ERROR_QUOTA: i64 = 4;

/// Deezer specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeezerConfig {
    pub app_id: String,
    pub secret: String,
    /// Base URL of the OAuth host (e.g. `https://connect.deezer.com`).
    pub connect_base_url: String,
    /// Base URL of the API (e.g. `https://api.deezer.com`).
    pub api_base_url: String,
    /// Comma separated permission list.
    pub perms: String,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub rate_limit: RateLimitConfig,
}

impl Default for DeezerConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            secret: String::new(),
            connect_base_url: "https://connect.deezer.com".to_string(),
            api_base_url: "https://api.deezer.com".to_string(),
            perms: "basic_access,email,offline_access,manage_library".to_string(),
            timeout_secs: 30,
            page_size: 50,
            // Deezer allows 50 requests per 5 seconds.
            rate_limit: RateLimitConfig::new(10.0, 10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    total: u64,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    id: Value,
    name: Option<String>,
    email: Option<String>,
}

/// Deezer API adapter.
#[derive(Debug)]
pub struct DeezerProvider {
    config: DeezerConfig,
    client: ProviderClient,
}

impl DeezerProvider {
    pub fn new(config: DeezerConfig) -> ProviderResult<Self> {
        let client = ProviderClient::new(
            SERVICE_NAME,
            Duration::from_secs(config.timeout_secs),
            &config.rate_limit,
        )?;
        Ok(Self { config, client })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base_url)
    }

    /// Sends a request and maps an in-body error object to a typed error.
    async fn call(
        &self,
        cancel: &CancellationToken,
        request: reqwest::RequestBuilder,
    ) -> ProviderResult<Value> {
        let body: Value = self.client.json(cancel, request).await?;
        match body.get("error") {
            Some(error) if error.is_object() => Err(api_error(error)),
            _ => Ok(body),
        }
    }

    async fn get(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        path: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<Value> {
        let request = self
            .client
            .http()
            .get(self.api(path))
            .query(&[("access_token", tokens.access_token.as_str())])
            .query(query);
        self.call(cancel, request).await
    }

    async fn post(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        path: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<Value> {
        let request = self
            .client
            .http()
            .post(self.api(path))
            .query(&[("access_token", tokens.access_token.as_str())])
            .query(query);
        self.call(cancel, request).await
    }

    /// Follows index paging, bounded by the reported total.
    async fn paged(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        path: &str,
    ) -> ProviderResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut index: u64 = 0;
        loop {
            let body = self
                .get(
                    cancel,
                    tokens,
                    path,
                    &[
                        ("limit", self.config.page_size.to_string()),
                        ("index", index.to_string()),
                    ],
                )
                .await?;
            let page: Page = serde_json::from_value(body).map_err(|e| ProviderError::Decode {
                service: SERVICE_NAME.to_string(),
                message: e.to_string(),
            })?;
            let fetched = page.data.len() as u64;
            items.extend(page.data);
            index += fetched;
            debug!(path, index, total = page.total, "fetched deezer page");

            if page.next.is_none() || fetched == 0 || index >= page.total {
                break;
            }
        }
        Ok(items)
    }

    async fn search_track(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        track: &UniversalTrack,
    ) -> ProviderResult<String> {
        let query = match track.artists.first() {
            Some(artist) => format!("artist:\"{artist}\" track:\"{}\"", track.title),
            None => format!("track:\"{}\"", track.title),
        };
        let body = self
            .get(
                cancel,
                tokens,
                "/search",
                &[("q", query), ("limit", "1".to_string())],
            )
            .await?;
        body.pointer("/data/0/id")
            .and_then(id_string)
            .ok_or_else(|| ProviderError::NotFound {
                service: SERVICE_NAME.to_string(),
                what: format!("track '{}'", track.title),
            })
    }
}

#[async_trait]
impl ServiceProvider for DeezerProvider {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: SERVICE_NAME.to_string(),
            display_name: "Deezer".to_string(),
            category: ServiceCategory::Music,
            supported_item_types: vec![ItemType::Track, ItemType::Playlist],
            supports_refresh: false,
        }
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn auth_url(&self, state: &str, redirect_url: &str) -> String {
        format!(
            "{}/oauth/auth.php?app_id={}&redirect_uri={}&perms={}&state={}",
            self.config.connect_base_url,
            urlencoding::encode(&self.config.app_id),
            urlencoding::encode(redirect_url),
            urlencoding::encode(&self.config.perms),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str, _redirect_url: &str) -> ProviderResult<OAuthTokens> {
        let request = self
            .client
            .http()
            .get(format!("{}/oauth/access_token.php", self.config.connect_base_url))
            .query(&[
                ("app_id", self.config.app_id.as_str()),
                ("secret", self.config.secret.as_str()),
                ("code", code),
                ("output", "json"),
            ]);
        let tokens = self.client.token_request(request, TokenOp::Exchange, None).await?;
        info!("Connected Deezer account");
        Ok(tokens)
    }

    async fn refresh_tokens(&self, _refresh_token: &str) -> ProviderResult<OAuthTokens> {
        Err(ProviderError::TokenRefresh {
            service: SERVICE_NAME.to_string(),
            message: "deezer does not issue refresh tokens".to_string(),
        })
    }

    async fn user_profile(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
    ) -> ProviderResult<UserProfile> {
        let body = self.get(cancel, tokens, "/user/me", &[]).await?;
        let profile: Profile = serde_json::from_value(body)?;
        Ok(UserProfile {
            id: id_string(&profile.id).unwrap_or_default(),
            display_name: profile.name,
            email: profile.email,
        })
    }

    async fn sync_user_data(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        last_sync: Option<DateTime<Utc>>,
    ) -> ProviderResult<UserDataResult> {
        let since = last_sync.map(|t| t.timestamp());
        let changed_since = |item: &Value, key: &str| match (since, item.get(key).and_then(Value::as_i64)) {
            (Some(since), Some(at)) => at >= since,
            _ => true,
        };

        let mut items = Vec::new();
        for track in self.paged(cancel, tokens, "/user/me/tracks").await? {
            if !changed_since(&track, "time_add") {
                continue;
            }
            let Some(id) = track.get("id").and_then(id_string) else {
                continue;
            };
            items.push(SyncItem::new(id, "track", ItemAction::Create, track));
        }

        for playlist in self.paged(cancel, tokens, "/user/me/playlists").await? {
            if !changed_since(&playlist, "time_mod") {
                continue;
            }
            let Some(id) = playlist.get("id").and_then(id_string) else {
                continue;
            };
            let action = if last_sync.is_some() {
                ItemAction::Update
            } else {
                ItemAction::Create
            };
            items.push(SyncItem::new(id, "playlist", action, playlist));
        }

        debug!(count = items.len(), "deezer user data fetched");
        Ok(UserDataResult {
            items,
            fetched_at: Utc::now(),
        })
    }

    async fn push_item(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        change: &ItemChange,
    ) -> ProviderResult<PushOutcome> {
        match change.item() {
            UniversalItem::Track(track) => {
                let id = if change.is_create() {
                    self.search_track(cancel, tokens, track).await?
                } else {
                    track.external_id.clone()
                };
                self.post(cancel, tokens, "/user/me/tracks", &[("track_id", id.clone())])
                    .await?;
                Ok(PushOutcome { external_id: id })
            }
            UniversalItem::Playlist(playlist) if change.is_create() => {
                let body = self
                    .post(
                        cancel,
                        tokens,
                        "/user/me/playlists",
                        &[("title", playlist.name.clone())],
                    )
                    .await?;
                let external_id = body.get("id").and_then(id_string).ok_or_else(|| {
                    ProviderError::Decode {
                        service: SERVICE_NAME.to_string(),
                        message: "playlist creation returned no id".to_string(),
                    }
                })?;
                Ok(PushOutcome { external_id })
            }
            UniversalItem::Playlist(playlist) => {
                let path = format!("/playlist/{}", urlencoding::encode(&playlist.external_id));
                self.post(
                    cancel,
                    tokens,
                    &path,
                    &[
                        ("title", playlist.name.clone()),
                        (
                            "description",
                            playlist.description.clone().unwrap_or_default(),
                        ),
                    ],
                )
                .await?;
                Ok(PushOutcome {
                    external_id: playlist.external_id.clone(),
                })
            }
            other => Err(ProviderError::UnsupportedItem {
                service: SERVICE_NAME.to_string(),
                item_type: other.item_type().to_string(),
            }),
        }
    }

    async fn health_check(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        let request = self.client.http().get(self.api("/infos"));
        self.client.check_health(cancel, request).await
    }
}

fn api_error(error: &Value) -> ProviderError {
    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    match code {
        Some(ERROR_INVALID_TOKEN) => ProviderError::InvalidTokens(SERVICE_NAME.to_string()),
        Some(ERROR_QUOTA) => ProviderError::UpstreamRateLimited {
            service: SERVICE_NAME.to_string(),
            retry_after_secs: None,
        },
        _ => ProviderError::Api {
            service: SERVICE_NAME.to_string(),
            code,
            message,
        },
    }
}

/// Deezer ids are numbers; other payloads may carry them as strings.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
