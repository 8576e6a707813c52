//! Server configuration.
//!
//! Every section has defaults, so a partial TOML file (or none at all) is
//! enough to start a local instance:
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! database_path = "/var/lib/tandem/tandem.db"
//!
//! [sync]
//! worker_count = 8
//!
//! [adapters.spotify]
//! client_id = "..."
//! client_secret = "..."
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tandem_crypto::TokenKey;
use tandem_providers::{DeezerConfig, GoogleCalendarConfig, ServiceCategory, SpotifyConfig};
use tandem_sync::SyncConfig;

/// Database path that selects an in-memory store.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// SQLite file, or `:memory:`.
    pub database_path: PathBuf,
    /// Environment variable holding the base64 token encryption key.
    pub token_key_env: String,
    /// `EnvFilter` directive used unless `RUST_LOG` is set.
    pub log_filter: String,
    pub sync: SyncConfig,
    pub adapters: AdaptersConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            database_path: PathBuf::from("tandem.db"),
            token_key_env: "TANDEM_TOKEN_KEY".to_string(),
            log_filter: "info".to_string(),
            sync: SyncConfig::default(),
            adapters: AdaptersConfig::default(),
        }
    }
}

/// Adapters to register. Absent sections are not registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub spotify: Option<SpotifyConfig>,
    pub deezer: Option<DeezerConfig>,
    pub google_calendar: Option<GoogleCalendarConfig>,
    /// In-memory services for local runs.
    pub memory: Vec<MemoryAdapterConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAdapterConfig {
    pub name: String,
    pub category: ServiceCategory,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }

    /// Reads the token encryption key from the configured environment variable.
    pub fn token_key(&self) -> Result<TokenKey> {
        let encoded = std::env::var(&self.token_key_env)
            .with_context(|| format!("{} is not set", self.token_key_env))?;
        TokenKey::from_base64(encoded.trim())
            .with_context(|| format!("{} is not a valid token key", self.token_key_env))
    }

    pub fn uses_in_memory_database(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_DATABASE
    }
}
