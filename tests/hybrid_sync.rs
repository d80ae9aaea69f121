//! Hybrid store against a mocked user-data API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{create_test_favorite, create_test_record, next_event, records};
use mockito::{Matcher, Server};
use serde_json::json;

use reelsync::backend::{Environment, StorageType};
use reelsync::cache::{CacheManager, DEFAULT_EXPIRY};
use reelsync::events::{EventBus, EventKind};
use reelsync::kv::MemoryKv;
use reelsync::remote::HttpRemote;
use reelsync::session::Session;
use reelsync::storage::HybridStore;
use reelsync::{DataEvent, RemoteError, StoreError, UserDataStore};

struct Fixture {
    cache: Arc<CacheManager>,
    bus: EventBus,
    store: HybridStore,
}

fn fixture(server: &Server) -> Fixture {
    let kv = Arc::new(MemoryKv::new());
    let cache = Arc::new(CacheManager::new(kv, DEFAULT_EXPIRY));
    let remote = HttpRemote::new(&server.url(), Duration::from_secs(5)).unwrap();
    let bus = EventBus::new();
    let store = HybridStore::new(
        StorageType::Upstash,
        cache.clone(),
        Arc::new(remote),
        bus.clone(),
        Arc::new(Session::with_username(Some("alice".to_string()))),
        Environment::default(),
    );
    Fixture { cache, bus, store }
}

#[tokio::test]
async fn stale_cache_is_served_then_replaced_by_server_copy() {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", "/api/playrecords")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::to_string(&records(&["tmdb+1", "tmdb+2"])).unwrap())
        .expect(1)
        .create_async()
        .await;

    let fx = fixture(&server);
    fx.cache.cache_play_records("alice", records(&["tmdb+1"]));
    let (_sub, mut rx) = fx.bus.subscribe_channel(EventKind::PlayRecordsUpdated);

    let served = fx.store.get_all_play_records().await;
    assert_eq!(served, records(&["tmdb+1"]));

    assert_eq!(
        next_event(&mut rx).await,
        DataEvent::PlayRecordsUpdated(records(&["tmdb+1", "tmdb+2"]))
    );
    assert_eq!(
        fx.cache.cached_play_records("alice"),
        Some(records(&["tmdb+1", "tmdb+2"]))
    );
    get.assert_async().await;
}

#[tokio::test]
async fn cache_miss_blocks_on_fetch_without_event() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/searchhistory")
        .with_status(200)
        .with_body(r#"["heat","alien"]"#)
        .create_async()
        .await;

    let fx = fixture(&server);
    let (_sub, mut rx) = fx.bus.subscribe_channel(EventKind::SearchHistoryUpdated);

    let history = fx.store.get_search_history().await;

    assert_eq!(history, vec!["heat".to_string(), "alien".to_string()]);
    assert_eq!(fx.cache.cached_search_history("alice"), Some(history));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_server_reads_as_empty() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/favorites")
        .with_status(503)
        .create_async()
        .await;

    let fx = fixture(&server);

    assert!(fx.store.get_all_favorites().await.is_empty());
    assert!(!fx.store.is_favorited("tmdb", "1").await);
    assert!(fx.cache.cached_favorites("alice").is_none());
}

#[tokio::test]
async fn rejected_write_publishes_twice_and_restores_server_state() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/playrecords")
        .match_body(Matcher::PartialJson(json!({"key": "tmdb+2"})))
        .with_status(500)
        .with_body(r#"{"error":"database unavailable"}"#)
        .expect(1)
        .create_async()
        .await;
    let get = server
        .mock("GET", "/api/playrecords")
        .with_status(200)
        .with_body(serde_json::to_string(&records(&["tmdb+1"])).unwrap())
        .expect(1)
        .create_async()
        .await;

    let fx = fixture(&server);
    fx.cache.cache_play_records("alice", records(&["tmdb+1"]));
    let (_sub, mut rx) = fx.bus.subscribe_channel(EventKind::PlayRecordsUpdated);

    let err = fx
        .store
        .save_play_record("tmdb", "2", create_test_record("tmdb+2"))
        .await
        .unwrap_err();

    match err {
        StoreError::Remote(RemoteError::Status { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert_eq!(
        next_event(&mut rx).await,
        DataEvent::PlayRecordsUpdated(records(&["tmdb+1", "tmdb+2"]))
    );
    assert_eq!(
        next_event(&mut rx).await,
        DataEvent::PlayRecordsUpdated(records(&["tmdb+1"]))
    );
    assert_eq!(fx.cache.cached_play_records("alice"), Some(records(&["tmdb+1"])));
    post.assert_async().await;
    get.assert_async().await;
}

#[tokio::test]
async fn accepted_write_does_not_refetch() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/favorites")
        .match_body(Matcher::PartialJson(json!({
            "key": "tmdb+7",
            "favorite": {"title": "Heat"}
        })))
        .with_status(200)
        .with_body(r#"{"success":true}"#)
        .expect(1)
        .create_async()
        .await;
    let get = server
        .mock("GET", "/api/favorites")
        .expect(0)
        .create_async()
        .await;

    let fx = fixture(&server);
    fx.cache.cache_favorites("alice", Default::default());
    let (_sub, mut rx) = fx.bus.subscribe_channel(EventKind::FavoritesUpdated);

    fx.store
        .save_favorite("tmdb", "7", create_test_favorite("Heat"))
        .await
        .unwrap();

    match next_event(&mut rx).await {
        DataEvent::FavoritesUpdated(favorites) => {
            assert_eq!(favorites.len(), 1);
            assert_eq!(favorites["tmdb+7"].title, "Heat");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());
    post.assert_async().await;
    get.assert_async().await;
}

#[tokio::test]
async fn search_term_is_trimmed_before_sending() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/searchhistory")
        .match_body(Matcher::Json(json!({"keyword": "blade runner"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let fx = fixture(&server);
    fx.cache
        .cache_search_history("alice", vec!["dune".to_string(), "blade runner".to_string()]);

    fx.store.add_search_history("  blade runner ").await.unwrap();

    assert_eq!(
        fx.cache.cached_search_history("alice"),
        Some(vec!["blade runner".to_string(), "dune".to_string()])
    );
    post.assert_async().await;
}

#[tokio::test]
async fn delete_favorite_sends_encoded_key() {
    let mut server = Server::new_async().await;
    let delete = server
        .mock("DELETE", "/api/favorites")
        .match_query(Matcher::UrlEncoded("key".into(), "tmdb+7".into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let fx = fixture(&server);
    let mut favorites = reelsync::Favorites::new();
    favorites.insert("tmdb+7".to_string(), create_test_favorite("Heat"));
    fx.cache.cache_favorites("alice", favorites);

    fx.store.delete_favorite("tmdb", "7").await.unwrap();

    assert_eq!(fx.cache.cached_favorites("alice"), Some(Default::default()));
    delete.assert_async().await;
}

#[tokio::test]
async fn refresh_all_fills_every_collection() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/playrecords")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    server
        .mock("GET", "/api/favorites")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    server
        .mock("GET", "/api/searchhistory")
        .with_status(500)
        .create_async()
        .await;

    let fx = fixture(&server);
    fx.store.refresh_all_cache().await;

    let status = fx.store.cache_status();
    assert!(status.has_play_records);
    assert!(status.has_favorites);
    assert!(!status.has_search_history);
    assert!(!status.is_complete());
}
