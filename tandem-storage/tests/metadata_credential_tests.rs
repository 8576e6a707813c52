use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use tandem_crypto::{TokenCipher, TokenKey};
use tandem_storage::{
    CredentialRepository, MetadataRepository, MetadataUpdate, SqliteStore, StorageError,
    SyncMetadata,
};
use tandem_types::{OAuthTokens, UserId};

fn store() -> SqliteStore {
    SqliteStore::open_in_memory(TokenCipher::new(&TokenKey::generate())).unwrap()
}

fn update(external_id: &str, checksum: &str) -> MetadataUpdate {
    MetadataUpdate {
        user_service_id: SyncMetadata::user_service_id(&UserId::new("u1"), "deezer"),
        external_id: external_id.into(),
        item_type: "track".into(),
        checksum: checksum.into(),
        last_modified: None,
        synced_at: Utc::now(),
    }
}

// ── Metadata ─────────────────────────────────────────────────────

#[test]
fn metadata_insert_then_bump() {
    let store = store();
    store.upsert_metadata_batch(&[update("t1", "aaa")]).unwrap();

    let first = store.get_metadata("2:u1:deezer", "t1", "track").unwrap().unwrap();
    assert_eq!(first.checksum, "aaa");
    assert_eq!(first.sync_count, 1);

    store.upsert_metadata_batch(&[update("t1", "bbb")]).unwrap();
    let second = store.get_metadata("2:u1:deezer", "t1", "track").unwrap().unwrap();
    assert_eq!(second.checksum, "bbb");
    assert_eq!(second.sync_count, 2);
}

#[test]
fn metadata_is_unique_per_item_type() {
    let store = store();
    let mut playlist = update("x", "p");
    playlist.item_type = "playlist".into();
    store
        .upsert_metadata_batch(&[update("x", "t"), playlist])
        .unwrap();

    assert_eq!(
        store.get_metadata("2:u1:deezer", "x", "track").unwrap().unwrap().checksum,
        "t"
    );
    assert_eq!(
        store.get_metadata("2:u1:deezer", "x", "playlist").unwrap().unwrap().checksum,
        "p"
    );
    assert!(store.get_metadata("2:u1:spotify", "x", "track").unwrap().is_none());
}

#[test]
fn empty_batch_is_a_no_op() {
    store().upsert_metadata_batch(&[]).unwrap();
}

#[test]
fn account_keys_do_not_collide_on_colons() {
    let left = SyncMetadata::user_service_id(&UserId::new("a:b"), "c");
    let right = SyncMetadata::user_service_id(&UserId::new("a"), "b:c");
    assert_ne!(left, right);
}

#[test]
fn pair_cursor_is_per_direction() {
    let store = store();
    let user = UserId::new("u1");
    assert!(store.last_pair_sync(&user, "spotify", "deezer").unwrap().is_none());

    let at = Utc::now();
    store.record_pair_sync(&user, "spotify", "deezer", at).unwrap();
    assert_eq!(store.last_pair_sync(&user, "spotify", "deezer").unwrap(), Some(at));
    assert!(store.last_pair_sync(&user, "deezer", "spotify").unwrap().is_none());

    let later = at + ChronoDuration::minutes(10);
    store.record_pair_sync(&user, "spotify", "deezer", later).unwrap();
    assert_eq!(store.last_pair_sync(&user, "spotify", "deezer").unwrap(), Some(later));
}

// ── Credentials ──────────────────────────────────────────────────

#[test]
fn tokens_roundtrip_encrypted() {
    let store = store();
    let user = UserId::new("u1");
    let tokens = OAuthTokens::new("access-123")
        .with_refresh_token("refresh-456")
        .with_expiry(Utc::now() + ChronoDuration::hours(1));

    store.save_tokens(&user, "spotify", &tokens).unwrap();
    assert_eq!(store.load_tokens(&user, "spotify").unwrap(), Some(tokens));
    assert_eq!(store.load_tokens(&user, "deezer").unwrap(), None);
}

#[test]
fn tokens_are_not_stored_in_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tandem.db");
    let store = SqliteStore::open(&path, TokenCipher::new(&TokenKey::generate())).unwrap();
    store
        .save_tokens(&UserId::new("u1"), "spotify", &OAuthTokens::new("very-secret-token"))
        .unwrap();
    drop(store);

    let raw = std::fs::read(&path).unwrap();
    let needle = b"very-secret-token";
    assert!(!raw.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn wrong_key_cannot_read_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tandem.db");
    let user = UserId::new("u1");
    SqliteStore::open(&path, TokenCipher::new(&TokenKey::generate()))
        .unwrap()
        .save_tokens(&user, "spotify", &OAuthTokens::new("tok"))
        .unwrap();

    let other = SqliteStore::open(&path, TokenCipher::new(&TokenKey::generate())).unwrap();
    assert!(matches!(
        other.load_tokens(&user, "spotify"),
        Err(StorageError::Encryption(_))
    ));
}

#[test]
fn token_blob_cannot_move_between_colon_ambiguous_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tandem.db");
    let store = SqliteStore::open(&path, TokenCipher::new(&TokenKey::generate())).unwrap();
    let (left, right) = (UserId::new("a:b"), UserId::new("a"));
    store.save_tokens(&left, "c", &OAuthTokens::new("left-token")).unwrap();
    store.save_tokens(&right, "b:c", &OAuthTokens::new("right-token")).unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "UPDATE credentials SET access_token =
            (SELECT access_token FROM credentials WHERE user_id = 'a:b' AND service = 'c')
         WHERE user_id = 'a' AND service = 'b:c'",
        [],
    )
    .unwrap();
    drop(conn);

    assert!(matches!(
        store.load_tokens(&right, "b:c"),
        Err(StorageError::Encryption(_))
    ));
    assert_eq!(
        store.load_tokens(&left, "c").unwrap().unwrap().access_token,
        "left-token"
    );
}

#[test]
fn connected_services_and_disconnect() {
    let store = store();
    let user = UserId::new("u1");
    store.save_tokens(&user, "spotify", &OAuthTokens::new("a")).unwrap();
    store.save_tokens(&user, "deezer", &OAuthTokens::new("b")).unwrap();
    store
        .save_tokens(&UserId::new("u2"), "google_calendar", &OAuthTokens::new("c"))
        .unwrap();

    assert_eq!(store.connected_services(&user).unwrap(), vec!["deezer", "spotify"]);
    assert!(store.delete_tokens(&user, "deezer").unwrap());
    assert!(!store.delete_tokens(&user, "deezer").unwrap());
    assert_eq!(store.connected_services(&user).unwrap(), vec!["spotify"]);
}
