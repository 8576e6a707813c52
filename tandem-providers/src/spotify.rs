//! Spotify adapter.
//!
//! Uses the Spotify Web API: saved tracks and the user's playlists are read
//! with offset/limit paging; writes go through search then save.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tandem_model::{ItemCapabilities, UniversalItem, UniversalPlaylist, UniversalTrack};
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

pub const SERVICE_NAME: &str = "spotify";

/// Spotify specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL of the accounts service (e.g. `https://accounts.spotify.com`).
    pub accounts_base_url: String,
    /// Base URL of the Web API (e.g. `https://api.spotify.com`).
    pub api_base_url: String,
    pub scopes: Vec<String>,
    pub timeout_secs: u64,
    /// Items per page; Spotify caps this at 50.
    pub page_size: u32,
    pub rate_limit: RateLimitConfig,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            accounts_base_url: "https://accounts.spotify.com".to_string(),
            api_base_url: "https://api.spotify.com".to_string(),
            scopes: vec![
                "user-read-email".to_string(),
                "user-library-read".to_string(),
                "user-library-modify".to_string(),
                "playlist-read-private".to_string(),
                "playlist-modify-private".to_string(),
            ],
            timeout_secs: 30,
            page_size: 50,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    total: u64,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
    display_name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Page,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Spotify Web API adapter.
#[derive(Debug)]
pub struct SpotifyProvider {
    config: SpotifyConfig,
    client: ProviderClient,
}

impl SpotifyProvider {
    pub fn new(config: SpotifyConfig) -> ProviderResult<Self> {
        let client = ProviderClient::new(
            SERVICE_NAME,
            Duration::from_secs(config.timeout_secs),
            &config.rate_limit,
        )?;
        Ok(Self { config, client })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/v1{path}", self.config.api_base_url)
    }

    /// Follows offset paging until upstream reports no next page.
    ///
    /// The offset only grows and is bounded by the reported total.
    async fn paged(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        path: &str,
    ) -> ProviderResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let request = self
                .client
                .http()
                .get(self.api(path))
                .bearer_auth(&tokens.access_token)
                .query(&[
                    ("limit", self.config.page_size.to_string()),
                    ("offset", offset.to_string()),
                ]);
            let page: Page = self.client.json(cancel, request).await?;
            let fetched = page.items.len() as u64;
            items.extend(page.items);
            offset += fetched;
            debug!(path, offset, total = page.total, "fetched spotify page");

            if page.next.is_none() || fetched == 0 || offset >= page.total {
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
        let query = match (&track.isrc, track.artists.first()) {
            (Some(isrc), _) => format!("isrc:{isrc}"),
            (None, Some(artist)) => format!("track:{} artist:{artist}", track.title),
            (None, None) => format!("track:{}", track.title),
        };

        let request = self
            .client
            .http()
            .get(self.api("/search"))
            .bearer_auth(&tokens.access_token)
            .query(&[("q", query.as_str()), ("type", "track"), ("limit", "1")]);
        let found: SearchResponse = self.client.json(cancel, request).await?;
        found
            .tracks
            .items
            .first()
            .and_then(|t| t.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::NotFound {
                service: SERVICE_NAME.to_string(),
                what: format!("track '{}'", track.title),
            })
    }

    async fn save_track(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        id: &str,
    ) -> ProviderResult<()> {
        let request = self
            .client
            .http()
            .put(self.api("/me/tracks"))
            .bearer_auth(&tokens.access_token)
            .json(&json!({ "ids": [id] }));
        self.client.send(cancel, request).await?;
        Ok(())
    }

    async fn push_playlist(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        playlist: &UniversalPlaylist,
        create: bool,
    ) -> ProviderResult<PushOutcome> {
        let body = json!({
            "name": playlist.name,
            "description": playlist.description.clone().unwrap_or_default(),
            "public": false,
        });
        if create {
            let request = self
                .client
                .http()
                .post(self.api("/me/playlists"))
                .bearer_auth(&tokens.access_token)
                .json(&body);
            let created: Created = self.client.json(cancel, request).await?;
            return Ok(PushOutcome {
                external_id: created.id,
            });
        }

        let path = format!("/playlists/{}", urlencoding::encode(&playlist.external_id));
        let request = self
            .client
            .http()
            .put(self.api(&path))
            .bearer_auth(&tokens.access_token)
            .json(&body);
        self.client.send(cancel, request).await?;
        Ok(PushOutcome {
            external_id: playlist.external_id.clone(),
        })
    }
}

#[async_trait]
impl ServiceProvider for SpotifyProvider {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: SERVICE_NAME.to_string(),
            display_name: "Spotify".to_string(),
            category: ServiceCategory::Music,
            supported_item_types: vec![ItemType::Track, ItemType::Playlist],
            supports_refresh: true,
        }
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn auth_url(&self, state: &str, redirect_url: &str) -> String {
        format!(
            "{}/authorize?\
            client_id={}&\
            response_type=code&\
            redirect_uri={}&\
            scope={}&\
            state={}",
            self.config.accounts_base_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_url),
            urlencoding::encode(&self.config.scopes.join(" ")),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_url: &str) -> ProviderResult<OAuthTokens> {
        let request = self
            .client
            .http()
            .post(format!("{}/api/token", self.config.accounts_base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_url),
            ]);
        let tokens = self.client.token_request(request, TokenOp::Exchange, None).await?;
        info!("Connected Spotify account");
        Ok(tokens)
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> ProviderResult<OAuthTokens> {
        let request = self
            .client
            .http()
            .post(format!("{}/api/token", self.config.accounts_base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ]);
        self.client
            .token_request(request, TokenOp::Refresh, Some(refresh_token))
            .await
    }

    async fn user_profile(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
    ) -> ProviderResult<UserProfile> {
        let request = self
            .client
            .http()
            .get(self.api("/me"))
            .bearer_auth(&tokens.access_token);
        let profile: Profile = self.client.json(cancel, request).await?;
        Ok(UserProfile {
            id: profile.id,
            display_name: profile.display_name,
            email: profile.email,
        })
    }

    async fn sync_user_data(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        last_sync: Option<DateTime<Utc>>,
    ) -> ProviderResult<UserDataResult> {
        let mut items = Vec::new();

        for saved in self.paged(cancel, tokens, "/me/tracks").await? {
            let added_at = saved
                .get("added_at")
                .and_then(Value::as_str)
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            if let (Some(since), Some(added)) = (last_sync, added_at) {
                if added < since {
                    continue;
                }
            }
            let Some(id) = saved
                .pointer("/track/id")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                // Local files and removed tracks have no id.
                continue;
            };
            items.push(SyncItem::new(id, "track", ItemAction::Create, saved));
        }

        // Playlists carry no modification time, so all of them are reported.
        for playlist in self.paged(cancel, tokens, "/me/playlists").await? {
            let Some(id) = playlist.get("id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let action = if last_sync.is_some() {
                ItemAction::Update
            } else {
                ItemAction::Create
            };
            items.push(SyncItem::new(id, "playlist", action, playlist));
        }

        debug!(count = items.len(), "spotify user data fetched");
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
                // Track content cannot be edited; an update just re-saves it.
                let id = if change.is_create() {
                    self.search_track(cancel, tokens, track).await?
                } else {
                    track.external_id.clone()
                };
                self.save_track(cancel, tokens, &id).await?;
                Ok(PushOutcome { external_id: id })
            }
            UniversalItem::Playlist(playlist) => {
                self.push_playlist(cancel, tokens, playlist, change.is_create())
                    .await
            }
            other => Err(ProviderError::UnsupportedItem {
                service: SERVICE_NAME.to_string(),
                item_type: other.item_type().to_string(),
            }),
        }
    }

    async fn health_check(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        let request = self.client.http().get(self.api("/me"));
        self.client.check_health(cancel, request).await
    }
}
