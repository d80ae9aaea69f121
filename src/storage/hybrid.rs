//! Remote-backed store with a per-user local cache.
//!
//! Reads answer from the cache when it holds a valid entry and reconcile in
//! the background:
//!
//! ```text
//! read ──► cache hit? ──yes──► return cached ──► spawn fetch ──► differs? ──► cache + publish
//!               │
//!               no ──► fetch (await) ──► cache ──► return      (failure: empty)
//! ```
//!
//! Writes are optimistic: mutate the cached collection, publish it, then call
//! the remote. A rejected write re-fetches the collection, caches and
//! publishes the server's copy, and only then returns the error.
//!
//! Without a logged-in user nothing is cached: reads always fetch and writes
//! publish the mutated (possibly partial) view before calling the remote.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{join3, BoxFuture};

use super::{CacheStatus, UserDataStore};
use crate::backend::{Environment, StorageMode, StorageType};
use crate::cache::CacheManager;
use crate::error::{RemoteError, StoreResult};
use crate::events::{DataEvent, EventBus};
use crate::keys::make_key;
use crate::model::{
    push_search_term, remove_search_term, Favorite, Favorites, PlayRecord, PlayRecords,
    SearchHistory,
};
use crate::remote::RemoteSource;
use crate::session::Session;

/// Per-collection plumbing so the read/write protocol is written once.
trait Collection: Send + Sync + 'static {
    type Data: Clone + PartialEq + Default + Send + Sync + 'static;

    const NAME: &'static str;

    fn cached(cache: &CacheManager, user: &str) -> Option<Self::Data>;

    fn cache(cache: &CacheManager, user: &str, data: Self::Data);

    fn invalidate(cache: &CacheManager, user: &str);

    fn fetch(remote: &dyn RemoteSource) -> BoxFuture<'_, Result<Self::Data, RemoteError>>;

    fn event(data: Self::Data) -> DataEvent;
}

struct PlayRecordsData;

impl Collection for PlayRecordsData {
    type Data = PlayRecords;

    const NAME: &'static str = "play records";

    fn cached(cache: &CacheManager, user: &str) -> Option<PlayRecords> {
        cache.cached_play_records(user)
    }

    fn cache(cache: &CacheManager, user: &str, data: PlayRecords) {
        cache.cache_play_records(user, data);
    }

    fn invalidate(cache: &CacheManager, user: &str) {
        cache.invalidate_play_records(user);
    }

    fn fetch(remote: &dyn RemoteSource) -> BoxFuture<'_, Result<PlayRecords, RemoteError>> {
        remote.fetch_play_records()
    }

    fn event(data: PlayRecords) -> DataEvent {
        DataEvent::PlayRecordsUpdated(data)
    }
}

struct FavoritesData;

impl Collection for FavoritesData {
    type Data = Favorites;

    const NAME: &'static str = "favorites";

    fn cached(cache: &CacheManager, user: &str) -> Option<Favorites> {
        cache.cached_favorites(user)
    }

    fn cache(cache: &CacheManager, user: &str, data: Favorites) {
        cache.cache_favorites(user, data);
    }

    fn invalidate(cache: &CacheManager, user: &str) {
        cache.invalidate_favorites(user);
    }

    fn fetch(remote: &dyn RemoteSource) -> BoxFuture<'_, Result<Favorites, RemoteError>> {
        remote.fetch_favorites()
    }

    fn event(data: Favorites) -> DataEvent {
        DataEvent::FavoritesUpdated(data)
    }
}

struct SearchHistoryData;

impl Collection for SearchHistoryData {
    type Data = SearchHistory;

    const NAME: &'static str = "search history";

    fn cached(cache: &CacheManager, user: &str) -> Option<SearchHistory> {
        cache.cached_search_history(user)
    }

    fn cache(cache: &CacheManager, user: &str, data: SearchHistory) {
        cache.cache_search_history(user, data);
    }

    fn invalidate(cache: &CacheManager, user: &str) {
        cache.invalidate_search_history(user);
    }

    fn fetch(remote: &dyn RemoteSource) -> BoxFuture<'_, Result<SearchHistory, RemoteError>> {
        remote.fetch_search_history()
    }

    fn event(data: SearchHistory) -> DataEvent {
        DataEvent::SearchHistoryUpdated(data)
    }
}

struct Inner {
    kind: StorageType,
    cache: Arc<CacheManager>,
    remote: Arc<dyn RemoteSource>,
    bus: EventBus,
    session: Arc<Session>,
    env: Environment,
}

impl Inner {
    async fn read<C: Collection>(self: &Arc<Self>) -> C::Data {
        if !self.env.has_durable_storage {
            return C::Data::default();
        }

        let user = self.session.username();
        if let Some(ref user) = user {
            if let Some(cached) = C::cached(&self.cache, user) {
                self.spawn_refresh::<C>(user.clone(), cached.clone());
                return cached;
            }
        }

        match C::fetch(self.remote.as_ref()).await {
            Ok(fresh) => {
                if let Some(ref user) = user {
                    C::cache(&self.cache, user, fresh.clone());
                }
                fresh
            }
            Err(e) => {
                tracing::error!("Failed to fetch {}: {}", C::NAME, e);
                C::Data::default()
            }
        }
    }

    /// Fetch in the background; cache and publish only if the server's copy
    /// differs from what the caller was given.
    fn spawn_refresh<C: Collection>(self: &Arc<Self>, user: String, served: C::Data) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, skipping background {} refresh", C::NAME);
            return;
        };
        let inner = Arc::clone(self);
        handle.spawn(async move {
            match C::fetch(inner.remote.as_ref()).await {
                Ok(fresh) if fresh != served => {
                    tracing::debug!("Remote {} changed, updating cache", C::NAME);
                    C::cache(&inner.cache, &user, fresh.clone());
                    inner.bus.publish(C::event(fresh));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Background {} refresh failed: {}", C::NAME, e),
            }
        });
    }

    fn writable(&self, op: &str) -> bool {
        if !self.env.has_durable_storage {
            tracing::warn!("No durable storage, ignoring {}", op);
        }
        self.env.has_durable_storage
    }

    /// Apply `mutate` to the cached collection (or the empty one), write it
    /// back and publish it. Returns the user the write was made for.
    fn apply_optimistic<C: Collection>(&self, mutate: impl FnOnce(&mut C::Data)) -> Option<String> {
        let user = self.session.username();
        let mut data = user
            .as_deref()
            .and_then(|u| C::cached(&self.cache, u))
            .unwrap_or_default();
        mutate(&mut data);
        if let Some(ref user) = user {
            C::cache(&self.cache, user, data.clone());
        }
        self.bus.publish(C::event(data));
        user
    }

    /// Finish a write once the remote has answered.
    async fn settle<C: Collection>(
        &self,
        user: Option<String>,
        result: Result<(), RemoteError>,
    ) -> StoreResult<()> {
        let Err(err) = result else {
            return Ok(());
        };
        tracing::error!("Remote rejected {} write: {}", C::NAME, err);

        match C::fetch(self.remote.as_ref()).await {
            Ok(fresh) => self.absorb::<C>(user.as_deref(), fresh),
            Err(e) => {
                tracing::error!("Failed to re-fetch {} after rejected write: {}", C::NAME, e);
                // Never keep the rejected optimistic state around.
                if let Some(ref user) = user {
                    C::invalidate(&self.cache, user);
                }
            }
        }
        Err(err.into())
    }

    fn absorb<C: Collection>(&self, user: Option<&str>, fresh: C::Data) {
        if let Some(user) = user {
            C::cache(&self.cache, user, fresh.clone());
        }
        self.bus.publish(C::event(fresh));
    }

    async fn refresh_all(&self) {
        if !self.env.has_durable_storage {
            return;
        }
        let user = self.session.username();
        let (records, favorites, history) = join3(
            self.remote.fetch_play_records(),
            self.remote.fetch_favorites(),
            self.remote.fetch_search_history(),
        )
        .await;

        match records {
            Ok(data) => self.absorb::<PlayRecordsData>(user.as_deref(), data),
            Err(e) => tracing::error!("Failed to refresh play records: {}", e),
        }
        match favorites {
            Ok(data) => self.absorb::<FavoritesData>(user.as_deref(), data),
            Err(e) => tracing::error!("Failed to refresh favorites: {}", e),
        }
        match history {
            Ok(data) => self.absorb::<SearchHistoryData>(user.as_deref(), data),
            Err(e) => tracing::error!("Failed to refresh search history: {}", e),
        }
    }

    fn cache_status(&self) -> CacheStatus {
        let Some(user) = self.session.username() else {
            return CacheStatus::default();
        };
        CacheStatus {
            has_play_records: self.cache.cached_play_records(&user).is_some(),
            has_favorites: self.cache.cached_favorites(&user).is_some(),
            has_search_history: self.cache.cached_search_history(&user).is_some(),
            username: Some(user),
        }
    }
}

/// Store for the remote storage types.
pub struct HybridStore {
    inner: Arc<Inner>,
}

impl HybridStore {
    pub fn new(
        kind: StorageType,
        cache: Arc<CacheManager>,
        remote: Arc<dyn RemoteSource>,
        bus: EventBus,
        session: Arc<Session>,
        env: Environment,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                cache,
                remote,
                bus,
                session,
                env,
            }),
        }
    }
}

#[async_trait]
impl UserDataStore for HybridStore {
    fn mode(&self) -> StorageMode {
        StorageMode::Remote(self.inner.kind)
    }

    async fn get_all_play_records(&self) -> PlayRecords {
        self.inner.read::<PlayRecordsData>().await
    }

    async fn save_play_record(&self, source: &str, id: &str, record: PlayRecord) -> StoreResult<()> {
        if !self.inner.writable("play record save") {
            return Ok(());
        }
        let key = make_key(source, id);
        let user = self.inner.apply_optimistic::<PlayRecordsData>(|records| {
            records.insert(key.clone(), record.clone());
        });
        let result = self.inner.remote.persist_play_record(&key, &record).await;
        self.inner.settle::<PlayRecordsData>(user, result).await
    }

    async fn delete_play_record(&self, source: &str, id: &str) -> StoreResult<()> {
        if !self.inner.writable("play record delete") {
            return Ok(());
        }
        let key = make_key(source, id);
        let user = self.inner.apply_optimistic::<PlayRecordsData>(|records| {
            records.remove(&key);
        });
        let result = self.inner.remote.delete_play_record(&key).await;
        self.inner.settle::<PlayRecordsData>(user, result).await
    }

    async fn clear_all_play_records(&self) -> StoreResult<()> {
        if !self.inner.writable("play record clear") {
            return Ok(());
        }
        let user = self.inner.apply_optimistic::<PlayRecordsData>(|records| records.clear());
        let result = self.inner.remote.clear_play_records().await;
        self.inner.settle::<PlayRecordsData>(user, result).await
    }

    async fn get_all_favorites(&self) -> Favorites {
        self.inner.read::<FavoritesData>().await
    }

    async fn save_favorite(&self, source: &str, id: &str, favorite: Favorite) -> StoreResult<()> {
        if !self.inner.writable("favorite save") {
            return Ok(());
        }
        let key = make_key(source, id);
        let user = self.inner.apply_optimistic::<FavoritesData>(|favorites| {
            favorites.insert(key.clone(), favorite.clone());
        });
        let result = self.inner.remote.persist_favorite(&key, &favorite).await;
        self.inner.settle::<FavoritesData>(user, result).await
    }

    async fn delete_favorite(&self, source: &str, id: &str) -> StoreResult<()> {
        if !self.inner.writable("favorite delete") {
            return Ok(());
        }
        let key = make_key(source, id);
        let user = self.inner.apply_optimistic::<FavoritesData>(|favorites| {
            favorites.remove(&key);
        });
        let result = self.inner.remote.delete_favorite(&key).await;
        self.inner.settle::<FavoritesData>(user, result).await
    }

    async fn is_favorited(&self, source: &str, id: &str) -> bool {
        self.get_all_favorites()
            .await
            .contains_key(&make_key(source, id))
    }

    async fn clear_all_favorites(&self) -> StoreResult<()> {
        if !self.inner.writable("favorite clear") {
            return Ok(());
        }
        let user = self.inner.apply_optimistic::<FavoritesData>(|favorites| favorites.clear());
        let result = self.inner.remote.clear_favorites().await;
        self.inner.settle::<FavoritesData>(user, result).await
    }

    async fn get_search_history(&self) -> SearchHistory {
        self.inner.read::<SearchHistoryData>().await
    }

    async fn add_search_history(&self, keyword: &str) -> StoreResult<()> {
        let trimmed = keyword.trim();
        if trimmed.is_empty() || !self.inner.writable("search history add") {
            return Ok(());
        }
        let user = self.inner.apply_optimistic::<SearchHistoryData>(|history| {
            if let Some(next) = push_search_term(history, trimmed) {
                *history = next;
            }
        });
        let result = self.inner.remote.add_search_term(trimmed).await;
        self.inner.settle::<SearchHistoryData>(user, result).await
    }

    async fn delete_search_history(&self, keyword: &str) -> StoreResult<()> {
        let trimmed = keyword.trim();
        if trimmed.is_empty() || !self.inner.writable("search history delete") {
            return Ok(());
        }
        let user = self.inner.apply_optimistic::<SearchHistoryData>(|history| {
            *history = remove_search_term(history, trimmed);
        });
        let result = self.inner.remote.delete_search_term(trimmed).await;
        self.inner.settle::<SearchHistoryData>(user, result).await
    }

    async fn clear_search_history(&self) -> StoreResult<()> {
        if !self.inner.writable("search history clear") {
            return Ok(());
        }
        let user = self.inner.apply_optimistic::<SearchHistoryData>(|history| history.clear());
        let result = self.inner.remote.clear_search_history().await;
        self.inner.settle::<SearchHistoryData>(user, result).await
    }

    async fn refresh_all_cache(&self) {
        self.inner.refresh_all().await;
    }

    fn preload_user_data(&self) {
        let status = self.inner.cache_status();
        if status.username.is_none() || status.is_complete() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, skipping user data preload");
            return;
        };
        tracing::debug!("Preloading user data for {:?}", status.username);
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move { inner.refresh_all().await });
    }

    fn cache_status(&self) -> CacheStatus {
        self.inner.cache_status()
    }

    fn clear_user_cache(&self) {
        if let Some(user) = self.inner.session.username() {
            self.inner.cache.clear_user(&user);
        }
    }
}
