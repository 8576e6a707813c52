//! Test server wiring for the HTTP API.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use tandem_crypto::{TokenCipher, TokenKey};
use tandem_providers::{InMemoryProvider, ServiceCategory, ServiceProvider, ServiceRegistry};
use tandem_server::{build_router, build_service, AppState, ServerConfig, USER_HEADER};
use tandem_storage::SqliteStore;
use tandem_sync::{EngineHandle, SyncConfig, SyncService};
use tandem_types::{ItemAction, SyncItem};
use tokio_util::sync::CancellationToken;

pub const USER: &str = "alice";

pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub service: Arc<SyncService>,
    pub spotify: Arc<InMemoryProvider>,
    pub deezer: Arc<InMemoryProvider>,
    pub engine: Option<EngineHandle>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).header(USER_HEADER, USER)
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).header(USER_HEADER, USER)
    }

    pub fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.patch(self.url(path)).header(USER_HEADER, USER)
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(self.url(path)).header(USER_HEADER, USER)
    }

    /// Connects `USER` to both music services through the API.
    pub async fn connect_both(&self) {
        for service in ["spotify", "deezer"] {
            let resp = self
                .post(&format!("/connections/{service}"))
                .json(&json!({"code": USER, "redirect_uri": "http://localhost/cb"}))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200, "connecting {service}");
        }
    }
}

/// Serves the API over in-memory adapters and an in-memory store.
///
/// Workers and the scheduler only run when `start_engine` is set.
pub async fn spawn_test_server(sync: SyncConfig, start_engine: bool) -> TestServer {
    let spotify = Arc::new(InMemoryProvider::new("spotify", ServiceCategory::Music));
    let deezer = Arc::new(InMemoryProvider::new("deezer", ServiceCategory::Music));
    let registry = ServiceRegistry::new();
    registry
        .register(spotify.clone() as Arc<dyn ServiceProvider>)
        .unwrap();
    registry
        .register(deezer.clone() as Arc<dyn ServiceProvider>)
        .unwrap();

    let store =
        Arc::new(SqliteStore::open_in_memory(TokenCipher::new(&TokenKey::generate())).unwrap());
    let config = ServerConfig {
        sync,
        ..ServerConfig::default()
    };
    let service = Arc::new(build_service(&config, registry, store).await.unwrap());
    let engine = start_engine.then(|| service.start(CancellationToken::new()));

    let app = build_router(AppState::new(Arc::clone(&service)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        service,
        spotify,
        deezer,
        engine,
    }
}

pub fn track(id: &str, title: &str, artist: &str) -> SyncItem {
    SyncItem::new(
        id,
        "track",
        ItemAction::Create,
        json!({"title": title, "artists": [artist]}),
    )
}

pub fn manual_body(mode: &str) -> serde_json::Value {
    json!({
        "service_pairs": [
            {"source_service": "spotify", "target_service": "deezer", "sync_mode": mode}
        ],
        "sync_type": "tracks",
        "sync_options": {"conflict_policy": "skip", "match_threshold": 0.8, "dry_run": false}
    })
}

pub fn schedule_body(frequency_secs: u64) -> serde_json::Value {
    json!({
        "service_pairs": [
            {"source_service": "spotify", "target_service": "deezer", "sync_mode": "sync-to"}
        ],
        "sync_type": "tracks",
        "schedule": {"frequency_secs": frequency_secs}
    })
}
