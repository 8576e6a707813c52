//! Google Calendar adapter.
//!
//! Uses Calendar API v3. Incremental pulls use `updatedMin` with deleted
//! events included, so cancellations come back as `Delete` items.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tandem_model::{ItemCapabilities, UniversalEvent, UniversalItem};
use tandem_types::{ItemAction, ItemType, OAuthTokens, SyncItem};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ProviderClient, TokenOp};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    ItemChange, PushOutcome, ServiceCategory, ServiceInfo, ServiceProvider, UserDataResult,
    UserProfile,
};
use crate::rate_limit::RateLimitConfig;

pub const SERVICE_NAME: &str = "google_calendar";

/// Google Calendar specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleCalendarConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL for the consent page (e.g. `https://accounts.google.com`).
    pub auth_base_url: String,
    /// Base URL for token calls (e.g. `https://oauth2.googleapis.com`).
    pub oauth_base_url: String,
    /// Base URL for the API (e.g. `https://www.googleapis.com`).
    pub api_base_url: String,
    pub calendar_id: String,
    pub scope: String,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub rate_limit: RateLimitConfig,
}

impl Default for GoogleCalendarConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_base_url: "https://accounts.google.com".to_string(),
            oauth_base_url: "https://oauth2.googleapis.com".to_string(),
            api_base_url: "https://www.googleapis.com".to_string(),
            calendar_id: "primary".to_string(),
            scope: "https://www.googleapis.com/auth/calendar".to_string(),
            timeout_secs: 30,
            page_size: 250,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Calendar {
    id: String,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Google Calendar adapter.
#[derive(Debug)]
pub struct GoogleCalendarProvider {
    config: GoogleCalendarConfig,
    client: ProviderClient,
}

impl GoogleCalendarProvider {
    pub fn new(config: GoogleCalendarConfig) -> ProviderResult<Self> {
        let client = ProviderClient::new(
            SERVICE_NAME,
            Duration::from_secs(config.timeout_secs),
            &config.rate_limit,
        )?;
        Ok(Self { config, client })
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendar/v3/calendars/{}/events",
            self.config.api_base_url,
            urlencoding::encode(&self.config.calendar_id)
        )
    }

    fn event_body(event: &UniversalEvent) -> ProviderResult<Value> {
        let start = event.start.ok_or_else(|| ProviderError::InvalidItem {
            service: SERVICE_NAME.to_string(),
            message: format!("event '{}' has no start time", event.title),
        })?;
        let end = event.end.unwrap_or(start + ChronoDuration::hours(1));
        Ok(json!({
            "summary": event.title,
            "description": event.description,
            "location": event.location,
            "start": { "dateTime": start.to_rfc3339_opts(SecondsFormat::Secs, true) },
            "end": { "dateTime": end.to_rfc3339_opts(SecondsFormat::Secs, true) },
        }))
    }
}

#[async_trait]
impl ServiceProvider for GoogleCalendarProvider {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: SERVICE_NAME.to_string(),
            display_name: "Google Calendar".to_string(),
            category: ServiceCategory::Calendar,
            supported_item_types: vec![ItemType::Event],
            supports_refresh: true,
        }
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn auth_url(&self, state: &str, redirect_url: &str) -> String {
        format!(
            "{}/o/oauth2/v2/auth?\
            client_id={}&\
            redirect_uri={}&\
            response_type=code&\
            scope={}&\
            access_type=offline&\
            prompt=consent&\
            state={}",
            self.config.auth_base_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_url),
            urlencoding::encode(&self.config.scope),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_url: &str) -> ProviderResult<OAuthTokens> {
        let request = self
            .client
            .http()
            .post(format!("{}/token", self.config.oauth_base_url))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_url),
                ("grant_type", "authorization_code"),
            ]);
        let tokens = self.client.token_request(request, TokenOp::Exchange, None).await?;
        info!("Connected Google Calendar account");
        Ok(tokens)
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> ProviderResult<OAuthTokens> {
        debug!("Refreshing Google Calendar access token");
        let request = self
            .client
            .http()
            .post(format!("{}/token", self.config.oauth_base_url))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
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
            .get(format!(
                "{}/calendar/v3/calendars/primary",
                self.config.api_base_url
            ))
            .bearer_auth(&tokens.access_token);
        let calendar: Calendar = self.client.json(cancel, request).await?;
        // The primary calendar id is the account's address.
        Ok(UserProfile {
            email: Some(calendar.id.clone()),
            display_name: calendar.summary,
            id: calendar.id,
        })
    }

    async fn sync_user_data(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        last_sync: Option<DateTime<Utc>>,
    ) -> ProviderResult<UserDataResult> {
        let mut items = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("maxResults", self.config.page_size.to_string()),
                ("singleEvents", "true".to_string()),
                ("showDeleted", last_sync.is_some().to_string()),
            ];
            if let Some(since) = last_sync {
                query.push(("updatedMin", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let request = self
                .client
                .http()
                .get(self.events_url())
                .bearer_auth(&tokens.access_token)
                .query(&query);
            let page: EventList = self.client.json(cancel, request).await?;
            debug!(count = page.items.len(), "fetched google calendar page");

            for event in page.items {
                let Some(id) = event.get("id").and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };
                let action = event_action(&event, last_sync);
                items.push(SyncItem::new(id, "event", action, event));
            }

            match page.next_page_token {
                Some(next) if !seen_tokens.contains(&next) => {
                    seen_tokens.insert(next.clone());
                    page_token = Some(next);
                }
                Some(next) => {
                    warn!(page_token = %next, "google calendar repeated a page token, stopping");
                    break;
                }
                None => break,
            }
        }

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
        let event = match change.item() {
            UniversalItem::Event(event) => event,
            other => {
                return Err(ProviderError::UnsupportedItem {
                    service: SERVICE_NAME.to_string(),
                    item_type: other.item_type().to_string(),
                });
            }
        };
        let body = Self::event_body(event)?;

        if change.is_create() {
            let request = self
                .client
                .http()
                .post(self.events_url())
                .bearer_auth(&tokens.access_token)
                .json(&body);
            let created: Created = self.client.json(cancel, request).await?;
            return Ok(PushOutcome {
                external_id: created.id,
            });
        }

        let request = self
            .client
            .http()
            .patch(format!(
                "{}/{}",
                self.events_url(),
                urlencoding::encode(&event.external_id)
            ))
            .bearer_auth(&tokens.access_token)
            .json(&body);
        self.client.send(cancel, request).await?;
        Ok(PushOutcome {
            external_id: event.external_id.clone(),
        })
    }

    async fn health_check(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        let request = self.client.http().get(format!(
            "{}/discovery/v1/apis/calendar/v3/rest",
            self.config.api_base_url
        ));
        self.client.check_health(cancel, request).await
    }
}

/// Cancelled events are deletions; events created before the cursor are updates.
fn event_action(event: &Value, last_sync: Option<DateTime<Utc>>) -> ItemAction {
    if event.get("status").and_then(Value::as_str) == Some("cancelled") {
        return ItemAction::Delete;
    }
    let created = event
        .get("created")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    match (last_sync, created) {
        (Some(since), Some(created)) if created <= since => ItemAction::Update,
        _ => ItemAction::Create,
    }
}
