//! Token-bucket rate limiting for outbound provider calls.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{ProviderError, ProviderResult};

/// Slowest refill rate; lower, zero or non-finite settings are raised to it.
const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Rate-limit settings for one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether requests are throttled at all.
    pub enabled: bool,
    /// Sustained refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity; also the number of requests allowed back to back.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10.0,
            burst: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            enabled: true,
            requests_per_second,
            burst,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket shared by every call an adapter makes.
///
/// The bucket starts full. Tokens refill continuously at
/// `requests_per_second` up to `burst`.
pub struct RateLimiter {
    service: String,
    enabled: bool,
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(service: impl Into<String>, config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        let rate = if config.requests_per_second.is_finite() {
            config.requests_per_second.max(MIN_REQUESTS_PER_SECOND)
        } else {
            MIN_REQUESTS_PER_SECOND
        };
        Self {
            service: service.into(),
            enabled: config.enabled,
            rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes a token if one is available, otherwise returns how long until one is.
    fn take(&self) -> Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(self.rate, self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    /// Non-blocking acquire. Returns false if the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Waits for a token, failing with `RateLimitCancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::RateLimitCancelled(self.service.clone()));
            }
            let wait = match self.take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            trace!(service = %self.service, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ProviderError::RateLimitCancelled(self.service.clone()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Whole tokens currently available (after refill).
    pub fn available(&self) -> u32 {
        if !self.enabled {
            return u32::MAX;
        }
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(self.rate, self.capacity);
        bucket.tokens.floor() as u32
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("service", &self.service)
            .field("enabled", &self.enabled)
            .field("rate", &self.rate)
            .field("capacity", &self.capacity)
            .finish()
    }
}
