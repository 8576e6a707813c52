//! In-memory adapter for local runs and tests.
//!
//! Accounts are keyed by access token. An authorization code becomes both
//! the access and the refresh token, so refreshing keeps the same account.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_model::{ItemCapabilities, UniversalItem};
use tandem_types::{ItemType, OAuthTokens, SyncItem};
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    ItemChange, PushOutcome, ServiceCategory, ServiceInfo, ServiceProvider, UserDataResult,
    UserProfile,
};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// How `sync_user_data` should fail when a failure is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailure {
    InvalidTokens,
    Upstream,
}

/// A write received by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPush {
    pub account: String,
    pub change: ItemChange,
    pub external_id: String,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Vec<SyncItem>>,
    pushes: Vec<RecordedPush>,
    failing_titles: HashSet<String>,
    sync_failure: Option<SyncFailure>,
    revoked: HashSet<String>,
    refresh_count: u32,
    sync_calls: u32,
    next_id: u64,
}

/// Deterministic adapter holding per-account item lists.
pub struct InMemoryProvider {
    name: String,
    category: ServiceCategory,
    limiter: RateLimiter,
    sync_delay: Option<Duration>,
    state: Mutex<State>,
}

impl InMemoryProvider {
    /// Creates an adapter with rate limiting disabled.
    pub fn new(name: impl Into<String>, category: ServiceCategory) -> Self {
        let name = name.into();
        Self {
            limiter: RateLimiter::new(name.clone(), &RateLimitConfig::disabled()),
            name,
            category,
            sync_delay: None,
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, config: &RateLimitConfig) -> Self {
        self.limiter = RateLimiter::new(self.name.clone(), config);
        self
    }

    /// Makes every pull take `delay` (observing cancellation).
    #[must_use]
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_items(self, account: &str, items: Vec<SyncItem>) -> Self {
        self.state().accounts.entry(account.to_string()).or_default().extend(items);
        self
    }

    pub fn add_item(&self, account: &str, item: SyncItem) {
        self.state().accounts.entry(account.to_string()).or_default().push(item);
    }

    /// Current items of an account, including pushed ones.
    pub fn items(&self, account: &str) -> Vec<SyncItem> {
        self.state().accounts.get(account).cloned().unwrap_or_default()
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.state().pushes.clone()
    }

    /// Makes pushes of items with this display name fail upstream.
    pub fn fail_push_for(&self, title: impl Into<String>) {
        self.state().failing_titles.insert(title.into());
    }

    pub fn fail_sync_with(&self, failure: Option<SyncFailure>) {
        self.state().sync_failure = failure;
    }

    /// Rejects the token from now on, as access and as refresh token.
    pub fn revoke(&self, token: impl Into<String>) {
        self.state().revoked.insert(token.into());
    }

    pub fn refresh_count(&self) -> u32 {
        self.state().refresh_count
    }

    pub fn sync_calls(&self) -> u32 {
        self.state().sync_calls
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, tokens: &OAuthTokens) -> ProviderResult<String> {
        if tokens.access_token.is_empty() || self.state().revoked.contains(&tokens.access_token) {
            return Err(ProviderError::InvalidTokens(self.name.clone()));
        }
        Ok(tokens.access_token.clone())
    }

    fn supported_item_types(&self) -> Vec<ItemType> {
        match self.category {
            ServiceCategory::Music => vec![ItemType::Track, ItemType::Playlist],
            ServiceCategory::Calendar => vec![ItemType::Event],
        }
    }
}

#[async_trait]
impl ServiceProvider for InMemoryProvider {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            display_name: self.name.clone(),
            category: self.category,
            supported_item_types: self.supported_item_types(),
            supports_refresh: true,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn auth_url(&self, state: &str, redirect_url: &str) -> String {
        format!(
            "memory://{}/authorize?state={}&redirect_uri={}",
            self.name,
            urlencoding::encode(state),
            urlencoding::encode(redirect_url)
        )
    }

    async fn exchange_code(&self, code: &str, _redirect_url: &str) -> ProviderResult<OAuthTokens> {
        self.limiter.acquire(&CancellationToken::new()).await?;
        if code.is_empty() || self.state().revoked.contains(code) {
            return Err(ProviderError::AuthExchange {
                service: self.name.clone(),
                message: "invalid authorization code".to_string(),
            });
        }
        Ok(OAuthTokens::new(code).with_refresh_token(code))
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> ProviderResult<OAuthTokens> {
        self.limiter.acquire(&CancellationToken::new()).await?;
        let mut state = self.state();
        if refresh_token.is_empty() || state.revoked.contains(refresh_token) {
            return Err(ProviderError::TokenRefresh {
                service: self.name.clone(),
                message: "refresh token rejected".to_string(),
            });
        }
        state.refresh_count += 1;
        Ok(OAuthTokens::new(refresh_token)
            .with_refresh_token(refresh_token)
            .with_expiry(Utc::now() + ChronoDuration::hours(1)))
    }

    async fn user_profile(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
    ) -> ProviderResult<UserProfile> {
        self.limiter.acquire(cancel).await?;
        let account = self.authorize(tokens)?;
        Ok(UserProfile {
            display_name: Some(account.clone()),
            email: None,
            id: account,
        })
    }

    async fn sync_user_data(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        _last_sync: Option<DateTime<Utc>>,
    ) -> ProviderResult<UserDataResult> {
        self.limiter.acquire(cancel).await?;
        if let Some(delay) = self.sync_delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled(self.name.clone())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        let account = self.authorize(tokens)?;

        let mut state = self.state();
        state.sync_calls += 1;
        match state.sync_failure {
            Some(SyncFailure::InvalidTokens) => {
                return Err(ProviderError::InvalidTokens(self.name.clone()));
            }
            Some(SyncFailure::Upstream) => {
                return Err(ProviderError::Upstream {
                    service: self.name.clone(),
                    status: 503,
                    message: "service unavailable".to_string(),
                });
            }
            None => {}
        }
        Ok(UserDataResult {
            items: state.accounts.get(&account).cloned().unwrap_or_default(),
            fetched_at: Utc::now(),
        })
    }

    async fn push_item(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        change: &ItemChange,
    ) -> ProviderResult<PushOutcome> {
        self.limiter.acquire(cancel).await?;
        let account = self.authorize(tokens)?;
        let item = change.item();

        let mut state = self.state();
        if state.failing_titles.contains(item.display_name()) {
            return Err(ProviderError::Upstream {
                service: self.name.clone(),
                status: 500,
                message: format!("rejected '{}'", item.display_name()),
            });
        }

        let external_id = match change {
            ItemChange::Create(item) => {
                state.next_id += 1;
                let id = format!("{}-{}", self.name, state.next_id);
                state
                    .accounts
                    .entry(account.clone())
                    .or_default()
                    .push(stored(&id, item));
                id
            }
            ItemChange::Update(item) => {
                let id = item.identifier().to_string();
                let slot = state
                    .accounts
                    .get_mut(&account)
                    .and_then(|items| items.iter_mut().find(|i| i.external_id == id))
                    .ok_or_else(|| ProviderError::NotFound {
                        service: self.name.clone(),
                        what: format!("item {id}"),
                    })?;
                *slot = stored(&id, item);
                id
            }
        };

        state.pushes.push(RecordedPush {
            account,
            change: change.clone(),
            external_id: external_id.clone(),
        });
        Ok(PushOutcome { external_id })
    }

    async fn health_check(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        self.limiter.acquire(cancel).await
    }
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

fn stored(id: &str, item: &UniversalItem) -> SyncItem {
    SyncItem::new(id, item.item_type().as_str(), item.action(), item.to_payload())
}
