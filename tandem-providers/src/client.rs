//! HTTP plumbing shared by the network adapters.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tandem_types::OAuthTokens;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Seconds shaved off `expires_in` so a token is refreshed before upstream rejects it.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Upstream error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 200;

/// Which token endpoint call is being made. Selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOp {
    Exchange,
    Refresh,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds until expiry. Deezer calls it `expires` and may send a string.
    #[serde(default, alias = "expires")]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    scope: Option<String>,
}

/// A rate-limited HTTP client bound to one service.
pub struct ProviderClient {
    service: String,
    http: Client,
    limiter: RateLimiter,
}

impl ProviderClient {
    pub fn new(
        service: impl Into<String>,
        timeout: Duration,
        rate_limit: &RateLimitConfig,
    ) -> ProviderResult<Self> {
        let service = service.into();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network {
                service: service.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            limiter: RateLimiter::new(service.clone(), rate_limit),
            service,
            http,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Sends a request after acquiring a rate-limit token.
    ///
    /// Non-success statuses are mapped: 401 to `InvalidTokens`, 429 to
    /// `UpstreamRateLimited`, anything else to `Upstream`.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        request: RequestBuilder,
    ) -> ProviderResult<Response> {
        let response = self.dispatch(cancel, request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(ProviderError::InvalidTokens(self.service.clone())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok());
                Err(ProviderError::UpstreamRateLimited {
                    service: self.service.clone(),
                    retry_after_secs,
                })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Upstream {
                    service: self.service.clone(),
                    status: status.as_u16(),
                    message: snippet(&body),
                })
            }
        }
    }

    /// [`send`](Self::send), then decode the body as JSON.
    pub async fn json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        request: RequestBuilder,
    ) -> ProviderResult<T> {
        let response = self.send(cancel, request).await?;
        self.decode(response).await
    }

    pub async fn decode<T: DeserializeOwned>(&self, response: Response) -> ProviderResult<T> {
        let bytes = response.bytes().await.map_err(|e| self.network(e))?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode {
            service: self.service.clone(),
            message: e.to_string(),
        })
    }

    /// Calls an OAuth token endpoint.
    ///
    /// Every failure maps to `AuthExchange` or `TokenRefresh` depending on
    /// `op`. On refresh, `previous_refresh` is kept when upstream does not
    /// rotate the refresh token. An expiry of zero, or one too large to
    /// represent, means the token never expires.
    pub async fn token_request(
        &self,
        request: RequestBuilder,
        op: TokenOp,
        previous_refresh: Option<&str>,
    ) -> ProviderResult<OAuthTokens> {
        // Token endpoints are not tied to a job, so nothing can cancel them.
        let never = CancellationToken::new();
        let fail = |message: String| self.token_error(op, message);

        let response = self
            .dispatch(&never, request)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| fail(e.to_string()))?;
        if !status.is_success() {
            return Err(fail(format!("status {}: {}", status.as_u16(), snippet(&body))));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| fail(format!("unreadable token response: {e}")))?;
        if parsed.access_token.is_empty() {
            return Err(fail("empty access token".to_string()));
        }

        let mut tokens = OAuthTokens::new(parsed.access_token);
        tokens.scope = parsed.scope;
        tokens.refresh_token = parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string));
        if let Some(secs) = parsed.expires_in.as_ref().and_then(lenient_secs) {
            if secs > 0 {
                let lifetime = secs.saturating_sub(EXPIRY_BUFFER_SECS).max(0);
                tokens.expires_at = ChronoDuration::try_seconds(lifetime)
                    .and_then(|d| Utc::now().checked_add_signed(d));
                if tokens.expires_at.is_none() {
                    debug!(service = %self.service, secs, "token lifetime out of range, treating as non-expiring");
                }
            }
        }

        debug!(service = %self.service, ?op, "token request succeeded");
        Ok(tokens)
    }

    /// Liveness check. Only transport failures and 5xx count as unhealthy.
    pub async fn check_health(&self, cancel: &CancellationToken, request: RequestBuilder) -> ProviderResult<()> {
        let response = self.dispatch(cancel, request).await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Upstream {
                service: self.service.clone(),
                status: status.as_u16(),
                message: "health check failed".to_string(),
            });
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        cancel: &CancellationToken,
        request: RequestBuilder,
    ) -> ProviderResult<Response> {
        self.limiter.acquire(cancel).await?;
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled(self.service.clone())),
            sent = request.send() => sent.map_err(|e| self.network(e)),
        }
    }

    fn network(&self, err: reqwest::Error) -> ProviderError {
        ProviderError::Network {
            service: self.service.clone(),
            message: err.to_string(),
        }
    }

    fn token_error(&self, op: TokenOp, message: String) -> ProviderError {
        let service = self.service.clone();
        match op {
            TokenOp::Exchange => ProviderError::AuthExchange { service, message },
            TokenOp::Refresh => ProviderError::TokenRefresh { service, message },
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("service", &self.service)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

fn lenient_secs(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}
