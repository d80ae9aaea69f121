//! User-data stores.
//!
//! - [`LocalStore`]: durable local storage is the only copy (default, no network)
//! - [`HybridStore`]: remote API is the source of truth, fronted by the
//!   per-user cache with optimistic writes and background reconciliation
//!
//! Callers hold a `Box<dyn UserDataStore>` and never branch on the mode
//! themselves. Every mutation publishes the full updated collection on the
//! [`EventBus`].

pub mod hybrid;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::backend::{resolve_for_environment, Environment, StorageMode};
use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::StoreResult;
use crate::events::EventBus;
use crate::kv::KvStore;
use crate::model::{Favorite, Favorites, PlayRecord, PlayRecords, SearchHistory};
use crate::remote::HttpRemote;
use crate::session::Session;

pub use hybrid::HybridStore;
pub use local::LocalStore;

/// Which collections currently have a valid cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub has_play_records: bool,
    pub has_favorites: bool,
    pub has_search_history: bool,
    pub username: Option<String>,
}

impl CacheStatus {
    pub fn is_complete(&self) -> bool {
        self.has_play_records && self.has_favorites && self.has_search_history
    }
}

/// Read/write access to play records, favorites and search history.
///
/// Reads never fail: storage or network problems degrade to cached or empty
/// data. Writes fail only after local state has been made consistent again.
///
/// Remote-backed reads and [`preload_user_data`](Self::preload_user_data)
/// schedule background work on the current tokio runtime. Called outside a
/// runtime, that work is skipped and logged.
#[async_trait]
pub trait UserDataStore: Send + Sync {
    fn mode(&self) -> StorageMode;

    // ── Play records ────────────────────────────────────────────────

    async fn get_all_play_records(&self) -> PlayRecords;

    async fn save_play_record(&self, source: &str, id: &str, record: PlayRecord) -> StoreResult<()>;

    async fn delete_play_record(&self, source: &str, id: &str) -> StoreResult<()>;

    async fn clear_all_play_records(&self) -> StoreResult<()>;

    // ── Favorites ───────────────────────────────────────────────────

    async fn get_all_favorites(&self) -> Favorites;

    async fn save_favorite(&self, source: &str, id: &str, favorite: Favorite) -> StoreResult<()>;

    async fn delete_favorite(&self, source: &str, id: &str) -> StoreResult<()>;

    async fn is_favorited(&self, source: &str, id: &str) -> bool;

    async fn clear_all_favorites(&self) -> StoreResult<()>;

    // ── Search history ──────────────────────────────────────────────

    async fn get_search_history(&self) -> SearchHistory;

    /// Blank terms are ignored.
    async fn add_search_history(&self, keyword: &str) -> StoreResult<()>;

    async fn delete_search_history(&self, keyword: &str) -> StoreResult<()>;

    async fn clear_search_history(&self) -> StoreResult<()>;

    // ── Cache management ────────────────────────────────────────────
    //
    // Only meaningful when a remote is involved; local-only stores keep the
    // defaults.

    /// Force-fetch every collection and overwrite the cache.
    async fn refresh_all_cache(&self) {}

    /// Warm the cache in the background unless it is already complete.
    fn preload_user_data(&self) {}

    fn cache_status(&self) -> CacheStatus {
        CacheStatus::default()
    }

    /// Drop the current user's cache (logout).
    fn clear_user_cache(&self) {}
}

/// Shared pieces every store is built from.
#[derive(Clone)]
pub struct StoreContext {
    pub kv: Arc<dyn KvStore>,
    pub bus: EventBus,
    pub session: Arc<Session>,
    pub env: Environment,
}

/// Build the store for the configured mode.
///
/// `cookie` is forwarded on every remote request so the API can identify the
/// user. Remote modes also schedule the one-shot expired-cache sweep, so this
/// must run inside a tokio runtime.
pub async fn open(
    config: &Config,
    ctx: StoreContext,
    cookie: Option<String>,
) -> Result<Box<dyn UserDataStore>> {
    match resolve_for_environment(&config.storage, ctx.env) {
        StorageMode::LocalOnly => {
            tracing::debug!("Using local storage backend");
            Ok(Box::new(LocalStore::new(ctx.kv, ctx.bus, ctx.env)))
        }
        StorageMode::Remote(kind) => {
            tracing::debug!("Using {} backend at {}", kind, config.storage.remote_url);
            let mut remote = HttpRemote::new(
                &config.storage.remote_url,
                Duration::from_secs(config.storage.request_timeout_secs),
            )?;
            if let Some(cookie) = cookie {
                remote = remote.with_cookie(cookie);
            }
            let cache = Arc::new(CacheManager::new(
                ctx.kv,
                Duration::from_secs(config.cache.expiry_secs),
            ));
            cache.spawn_expired_sweep(Duration::from_millis(config.cache.sweep_delay_ms));
            Ok(Box::new(HybridStore::new(
                kind,
                cache,
                Arc::new(remote),
                ctx.bus,
                ctx.session,
                ctx.env,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StorageType;
    use crate::kv::{KvStore, MemoryKv};

    fn context() -> StoreContext {
        StoreContext {
            kv: Arc::new(MemoryKv::new()),
            bus: EventBus::new(),
            session: Arc::new(Session::with_username(Some("alice".to_string()))),
            env: Environment::default(),
        }
    }

    #[tokio::test]
    async fn test_open_local_by_default() {
        let store = open(&Config::default(), context(), None).await.unwrap();
        assert_eq!(store.mode(), StorageMode::LocalOnly);
        assert_eq!(store.cache_status(), CacheStatus::default());
    }

    #[tokio::test]
    async fn test_open_remote() {
        let mut config = Config::default();
        config.storage.storage_type = "upstash".to_string();
        let store = open(&config, context(), Some("auth=x".to_string())).await.unwrap();
        assert_eq!(store.mode(), StorageMode::Remote(StorageType::Upstash));
        assert_eq!(store.cache_status().username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_open_remote_schedules_expired_sweep() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("reelsync_cache_ghost", "{}").unwrap();
        kv.set("reelsync_favorites", "{}").unwrap();
        let mut ctx = context();
        ctx.kv = kv.clone();
        let mut config = Config::default();
        config.storage.storage_type = "d1".to_string();
        config.cache.sweep_delay_ms = 20;

        let _store = open(&config, ctx, None).await.unwrap();
        assert!(kv.get("reelsync_cache_ghost").unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(kv.get("reelsync_cache_ghost").unwrap().is_none());
        assert!(kv.get("reelsync_favorites").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_local_schedules_no_sweep() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("reelsync_cache_ghost", "{}").unwrap();
        let mut ctx = context();
        ctx.kv = kv.clone();
        let mut config = Config::default();
        config.cache.sweep_delay_ms = 0;

        let _store = open(&config, ctx, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(kv.get("reelsync_cache_ghost").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_remote_without_network_is_local() {
        let mut config = Config::default();
        config.storage.storage_type = "redis".to_string();
        let mut ctx = context();
        ctx.env.has_network = false;
        let store = open(&config, ctx, None).await.unwrap();
        assert_eq!(store.mode(), StorageMode::LocalOnly);
    }

    #[test]
    fn test_cache_status_complete() {
        let mut status = CacheStatus {
            has_play_records: true,
            has_favorites: true,
            has_search_history: true,
            username: None,
        };
        assert!(status.is_complete());
        status.has_favorites = false;
        assert!(!status.is_complete());
    }
}
