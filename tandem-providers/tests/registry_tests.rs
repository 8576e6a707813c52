use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tandem_model::{UniversalItem, UniversalTrack};
use tandem_providers::{
    InMemoryProvider, ItemChange, ProviderError, ServiceCategory, ServiceProvider, ServiceRegistry,
    SyncFailure,
};
use tandem_types::{ItemAction, OAuthTokens, SyncItem, SyncMode};
use tokio_util::sync::CancellationToken;

fn music(name: &str) -> Arc<dyn ServiceProvider> {
    Arc::new(InMemoryProvider::new(name, ServiceCategory::Music))
}

fn calendar(name: &str) -> Arc<dyn ServiceProvider> {
    Arc::new(InMemoryProvider::new(name, ServiceCategory::Calendar))
}

fn track_item(id: &str, title: &str) -> SyncItem {
    SyncItem::new(
        id,
        "track",
        ItemAction::Create,
        json!({"title": title, "artists": ["Artist X"]}),
    )
}

fn universal_track(id: &str, title: &str) -> UniversalItem {
    UniversalItem::Track(UniversalTrack {
        external_id: id.to_string(),
        service: "memory".to_string(),
        title: title.to_string(),
        artists: vec!["Artist X".to_string()],
        album: None,
        duration_ms: None,
        isrc: None,
        action: ItemAction::Create,
    })
}

// ── Registry ────────────────────────────────────────────────────

#[test]
fn register_rejects_duplicates() {
    let registry = ServiceRegistry::new();
    registry.register(music("spotify")).unwrap();

    let err = registry.register(music("spotify")).unwrap_err();
    assert!(matches!(err, ProviderError::DuplicateService(ref s) if s == "spotify"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn get_unknown_service_is_unavailable() {
    let registry = ServiceRegistry::new();
    assert!(registry.is_empty());
    assert!(!registry.is_service_available("tidal"));
    assert!(matches!(
        registry.get("tidal"),
        Err(ProviderError::ServiceUnavailable(_))
    ));
}

#[test]
fn list_services_is_sorted_and_filterable() {
    let registry = ServiceRegistry::new();
    registry.register(music("spotify")).unwrap();
    registry.register(calendar("google_calendar")).unwrap();
    registry.register(music("deezer")).unwrap();

    let names: Vec<String> = registry.list_services().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["deezer", "google_calendar", "spotify"]);

    let music_names: Vec<String> = registry
        .services_by_category(ServiceCategory::Music)
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(music_names, vec!["deezer", "spotify"]);
}

#[test]
fn supported_pairs_cover_same_category_in_every_mode() {
    let registry = ServiceRegistry::new();
    registry.register(music("spotify")).unwrap();
    registry.register(music("deezer")).unwrap();
    registry.register(calendar("google_calendar")).unwrap();

    let pairs = registry.supported_pairs();
    // Two ordered music pairs, a lone calendar service pairs with nothing.
    assert_eq!(pairs.len(), 2 * SyncMode::ALL.len());
    assert!(pairs.iter().all(|p| p.source_service != p.target_service));
    assert!(pairs.iter().all(|p| p.source_service != "google_calendar"));

    registry.register(calendar("outlook")).unwrap();
    assert_eq!(registry.supported_pairs().len(), 4 * SyncMode::ALL.len());
}

#[tokio::test]
async fn health_report_covers_every_service() {
    let registry = ServiceRegistry::new();
    registry.register(music("spotify")).unwrap();
    registry.register(calendar("google_calendar")).unwrap();

    let report = registry.health_report(&CancellationToken::new()).await;
    assert_eq!(report.len(), 2);
    assert!(report.iter().all(|h| h.healthy && h.error.is_none()));
}

#[tokio::test]
async fn concurrent_lookups_see_registered_services() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(music("spotify")).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move { registry.get("spotify").is_ok() }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

// ── In-memory adapter ───────────────────────────────────────────

#[tokio::test]
async fn memory_code_exchange_maps_to_account() {
    let provider = InMemoryProvider::new("memory", ServiceCategory::Music)
        .with_items("alice", vec![track_item("t1", "Song A")]);

    let tokens = provider.exchange_code("alice", "").await.unwrap();
    assert_eq!(tokens.access_token, "alice");
    assert!(tokens.can_refresh());

    let data = provider
        .sync_user_data(&CancellationToken::new(), &tokens, None)
        .await
        .unwrap();
    assert_eq!(data.items, vec![track_item("t1", "Song A")]);
    assert_eq!(provider.sync_calls(), 1);
}

#[tokio::test]
async fn memory_refresh_counts_and_honours_revocation() {
    let provider = InMemoryProvider::new("memory", ServiceCategory::Music);
    let refreshed = provider.refresh_tokens("alice").await.unwrap();
    assert_eq!(refreshed.access_token, "alice");
    assert!(refreshed.expires_at.is_some());
    assert_eq!(provider.refresh_count(), 1);

    provider.revoke("alice");
    assert!(matches!(
        provider.refresh_tokens("alice").await,
        Err(ProviderError::TokenRefresh { .. })
    ));
    assert!(matches!(
        provider
            .sync_user_data(&CancellationToken::new(), &OAuthTokens::new("alice"), None)
            .await,
        Err(ProviderError::InvalidTokens(_))
    ));
}

#[tokio::test]
async fn memory_push_create_then_update() {
    let provider = InMemoryProvider::new("memory", ServiceCategory::Music);
    let tokens = OAuthTokens::new("bob");
    let cancel = CancellationToken::new();

    let created = provider
        .push_item(&cancel, &tokens, &ItemChange::Create(universal_track("src-1", "Song A")))
        .await
        .unwrap();
    assert_eq!(created.external_id, "memory-1");
    assert_eq!(provider.items("bob").len(), 1);

    let updated = provider
        .push_item(
            &cancel,
            &tokens,
            &ItemChange::Update(universal_track("memory-1", "Song A (Live)")),
        )
        .await
        .unwrap();
    assert_eq!(updated.external_id, "memory-1");

    let items = provider.items("bob");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data["title"], "Song A (Live)");
    assert_eq!(provider.pushes().len(), 2);
}

#[tokio::test]
async fn memory_update_of_missing_item_is_not_found() {
    let provider = InMemoryProvider::new("memory", ServiceCategory::Music);
    let err = provider
        .push_item(
            &CancellationToken::new(),
            &OAuthTokens::new("bob"),
            &ItemChange::Update(universal_track("nope", "Song")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound { .. }));
}

#[tokio::test]
async fn memory_failure_switches() {
    let provider = InMemoryProvider::new("memory", ServiceCategory::Music);
    let tokens = OAuthTokens::new("bob");
    let cancel = CancellationToken::new();

    provider.fail_push_for("Bad Song");
    let err = provider
        .push_item(&cancel, &tokens, &ItemChange::Create(universal_track("x", "Bad Song")))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Upstream { status: 500, .. }));
    assert!(provider.pushes().is_empty());

    provider.fail_sync_with(Some(SyncFailure::Upstream));
    assert!(provider.sync_user_data(&cancel, &tokens, None).await.is_err());
    provider.fail_sync_with(None);
    assert!(provider.sync_user_data(&cancel, &tokens, None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn memory_sync_delay_observes_cancellation() {
    let provider = InMemoryProvider::new("memory", ServiceCategory::Music)
        .with_sync_delay(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = provider
        .sync_user_data(&cancel, &OAuthTokens::new("bob"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled(_)));
}
