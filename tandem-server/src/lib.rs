//! HTTP server for the Tandem sync engine.
//!
//! The binary reads a [`ServerConfig`], opens the store, registers the
//! configured adapters and serves [`build_router`] while the engine's
//! workers and scheduler run in the background.

mod api;
mod config;
mod error;

pub use api::{
    build_router, AppState, AuthorizeResponse, ConnectBody, ConnectionsResponse, CurrentUser,
    ManualSyncBody, ScheduleBody, USER_HEADER,
};
pub use config::{AdaptersConfig, MemoryAdapterConfig, ServerConfig, IN_MEMORY_DATABASE};
pub use error::{ApiError, ErrorBody};

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tandem_crypto::{TokenCipher, TokenKey};
use tandem_providers::{
    DeezerProvider, GoogleCalendarProvider, InMemoryProvider, ServiceProvider, ServiceRegistry,
    SpotifyProvider,
};
use tandem_storage::{SqliteStore, Store};
use tandem_sync::{SyncService, TracingNotifier};
use tracing::info;

/// Registers every adapter named in `config`.
pub fn build_registry(config: &AdaptersConfig) -> Result<ServiceRegistry> {
    let registry = ServiceRegistry::new();

    if let Some(spotify) = &config.spotify {
        let provider = SpotifyProvider::new(spotify.clone()).context("Invalid Spotify config")?;
        registry.register(Arc::new(provider))?;
    }
    if let Some(deezer) = &config.deezer {
        let provider = DeezerProvider::new(deezer.clone()).context("Invalid Deezer config")?;
        registry.register(Arc::new(provider))?;
    }
    if let Some(calendar) = &config.google_calendar {
        let provider = GoogleCalendarProvider::new(calendar.clone())
            .context("Invalid Google Calendar config")?;
        registry.register(Arc::new(provider))?;
    }
    for memory in &config.memory {
        let provider: Arc<dyn ServiceProvider> =
            Arc::new(InMemoryProvider::new(memory.name.clone(), memory.category));
        registry
            .register(provider)
            .with_context(|| format!("Cannot register in-memory adapter {}", memory.name))?;
    }

    info!(services = registry.len(), "Adapters registered");
    Ok(registry)
}

/// Opens the configured SQLite store with the given token key.
pub fn open_store(config: &ServerConfig, key: &TokenKey) -> Result<SqliteStore> {
    let cipher = TokenCipher::new(key);
    if config.uses_in_memory_database() {
        return SqliteStore::open_in_memory(cipher).context("Failed to open in-memory store");
    }
    SqliteStore::open(&config.database_path, cipher).with_context(|| {
        format!(
            "Failed to open database {}",
            config.database_path.display()
        )
    })
}

/// Builds the sync service and restores its schedules.
///
/// Elapsed schedules are re-armed one period ahead rather than fired.
pub async fn build_service(
    config: &ServerConfig,
    registry: ServiceRegistry,
    store: Arc<dyn Store>,
) -> Result<SyncService> {
    let service = SyncService::new(
        Arc::new(registry),
        store,
        Arc::new(TracingNotifier),
        config.sync.clone(),
    );

    let now = Utc::now();
    let loaded = service
        .scheduler()
        .load(now)
        .await
        .context("Failed to load schedules")?;
    let rearmed = service
        .scheduler()
        .reconcile_elapsed(now)
        .await
        .context("Failed to re-arm elapsed schedules")?;
    info!(loaded, rearmed, "Schedules restored");
    Ok(service)
}
