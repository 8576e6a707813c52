//! The capability interface every external service adapter implements.
//!
//! Adapters compose a [`ProviderClient`](crate::ProviderClient) for rate
//! limiting and HTTP plumbing instead of inheriting shared behaviour.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tandem_model::UniversalItem;
use tandem_types::{ItemType, OAuthTokens, SyncItem};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderResult;

/// Domain a service belongs to. Only services of the same category pair up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Music,
    Calendar,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = tandem_types::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "music" => Ok(Self::Music),
            "calendar" => Ok(Self::Calendar),
            other => Err(tandem_types::Error::UnknownVariant {
                kind: "service category",
                value: other.to_string(),
            }),
        }
    }
}

/// Static description of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Registry key, e.g. `spotify`.
    pub name: String,
    pub display_name: String,
    pub category: ServiceCategory,
    pub supported_item_types: Vec<ItemType>,
    /// Whether `refresh_tokens` can ever succeed.
    pub supports_refresh: bool,
}

impl ServiceInfo {
    pub fn supports(&self, item_type: ItemType) -> bool {
        self.supported_item_types.contains(&item_type)
    }
}

/// The account the tokens belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Items that changed upstream since the requested point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataResult {
    /// In upstream fetch order, first page first.
    pub items: Vec<SyncItem>,
    pub fetched_at: DateTime<Utc>,
}

/// A write the executor asks an adapter to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemChange {
    /// Add the item to the service. Its identity is that of the source.
    Create(UniversalItem),
    /// Replace the service's copy. The item carries the target identity.
    Update(UniversalItem),
}

impl ItemChange {
    pub fn item(&self) -> &UniversalItem {
        match self {
            Self::Create(item) | Self::Update(item) => item,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create(_))
    }
}

/// Identifier the service assigned to the written item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub external_id: String,
}

/// Uniform interface over an external service.
///
/// Every network-bound call acquires a token from the adapter's rate limiter
/// before any request is issued.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    fn info(&self) -> ServiceInfo;

    /// Registry key. Must equal `info().name`.
    fn name(&self) -> &str;

    /// URL the user visits to grant access.
    fn auth_url(&self, state: &str, redirect_url: &str) -> String;

    /// Exchanges an authorization code. Fails with `AuthExchange`.
    async fn exchange_code(&self, code: &str, redirect_url: &str) -> ProviderResult<OAuthTokens>;

    /// Fails with `TokenRefresh`.
    async fn refresh_tokens(&self, refresh_token: &str) -> ProviderResult<OAuthTokens>;

    async fn user_profile(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
    ) -> ProviderResult<UserProfile>;

    /// Every item changed since `last_sync`, or everything when `None`.
    /// Pagination is handled here.
    async fn sync_user_data(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        last_sync: Option<DateTime<Utc>>,
    ) -> ProviderResult<UserDataResult>;

    async fn push_item(
        &self,
        cancel: &CancellationToken,
        tokens: &OAuthTokens,
        change: &ItemChange,
    ) -> ProviderResult<PushOutcome>;

    async fn health_check(&self, cancel: &CancellationToken) -> ProviderResult<()>;
}
