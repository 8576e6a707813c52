//! Error types for provider adapters.

use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur while talking to an external service.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A provider with this name is already registered.
    #[error("service already registered: {0}")]
    DuplicateService(String),

    /// No provider is registered under this name.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Authorization code could not be exchanged.
    #[error("{service}: authorization code exchange failed: {message}")]
    AuthExchange { service: String, message: String },

    /// Refresh token was rejected or is not supported.
    #[error("{service}: token refresh failed: {message}")]
    TokenRefresh { service: String, message: String },

    /// Upstream rejected the access token.
    #[error("{0}: access token is invalid or expired")]
    InvalidTokens(String),

    /// The caller gave up while waiting for a rate-limit token.
    #[error("{0}: cancelled while waiting for rate limiter")]
    RateLimitCancelled(String),

    /// The caller gave up while a request was in flight.
    #[error("{0}: request cancelled")]
    Cancelled(String),

    /// Upstream asked us to slow down.
    #[error("{service}: upstream rate limit hit")]
    UpstreamRateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    /// Non-success HTTP status.
    #[error("{service}: upstream returned {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    /// Transport failure (connect, timeout, TLS).
    #[error("{service}: network error: {message}")]
    Network { service: String, message: String },

    /// Error reported inside a successful response body.
    #[error("{service}: api error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Api {
        service: String,
        code: Option<i64>,
        message: String,
    },

    /// Response body did not have the expected shape.
    #[error("{service}: unexpected response: {message}")]
    Decode { service: String, message: String },

    /// The service cannot store this kind of item.
    #[error("{service} does not support {item_type} items")]
    UnsupportedItem { service: String, item_type: String },

    /// The item lacks data the service requires.
    #[error("{service}: invalid item: {message}")]
    InvalidItem { service: String, message: String },

    /// Lookup on the upstream side found nothing.
    #[error("{service}: not found: {what}")]
    NotFound { service: String, what: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// True for errors that mean the user must re-authorize.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::InvalidTokens(_) | Self::TokenRefresh { .. } | Self::AuthExchange { .. }
        )
    }

    /// True for errors caused by cancellation rather than upstream state.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RateLimitCancelled(_) | Self::Cancelled(_))
    }
}
