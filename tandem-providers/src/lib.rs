//! External service adapters for Tandem.
//!
//! Every adapter implements [`ServiceProvider`] and routes network calls
//! through a per-adapter token-bucket [`RateLimiter`]. Adapters are
//! registered once at startup in a [`ServiceRegistry`] which the sync engine
//! queries for lookups, categories and supported pairs.
//!
//! Included adapters:
//! - [`SpotifyProvider`] (music, offset paging)
//! - [`DeezerProvider`] (music, index paging, no refresh tokens)
//! - [`GoogleCalendarProvider`] (calendar, page-token paging)
//! - [`InMemoryProvider`] (any category, for local runs and tests)

mod client;
pub mod deezer;
mod error;
pub mod google_calendar;
mod memory;
mod provider;
mod rate_limit;
mod registry;
pub mod spotify;

pub use client::{ProviderClient, TokenOp};
pub use deezer::{DeezerConfig, DeezerProvider};
pub use error::{ProviderError, ProviderResult};
pub use google_calendar::{GoogleCalendarConfig, GoogleCalendarProvider};
pub use memory::{InMemoryProvider, RecordedPush, SyncFailure};
pub use provider::{
    ItemChange, PushOutcome, ServiceCategory, ServiceInfo, ServiceProvider, UserDataResult,
    UserProfile,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use registry::{ServiceHealth, ServiceRegistry};
pub use spotify::{SpotifyConfig, SpotifyProvider};
