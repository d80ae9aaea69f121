//! Local-only store: durable KV storage is the only copy.
//!
//! Each collection is a single JSON value under a fixed key, rewritten in
//! full on every mutation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::UserDataStore;
use crate::backend::{Environment, StorageMode};
use crate::error::{StoreError, StoreResult};
use crate::events::{DataEvent, EventBus};
use crate::keys::make_key;
use crate::kv::KvStore;
use crate::model::{
    push_search_term, remove_search_term, Favorite, Favorites, PlayRecord, PlayRecords,
    SearchHistory,
};

pub const PLAY_RECORDS_KEY: &str = "reelsync_play_records";
pub const FAVORITES_KEY: &str = "reelsync_favorites";
pub const SEARCH_HISTORY_KEY: &str = "reelsync_search_history";

pub struct LocalStore {
    kv: Arc<dyn KvStore>,
    bus: EventBus,
    env: Environment,
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KvStore>, bus: EventBus, env: Environment) -> Self {
        Self { kv, bus, env }
    }

    /// Missing, unreadable or malformed values read as the empty collection.
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        if !self.env.has_durable_storage {
            return T::default();
        }
        match self.kv.get(key) {
            Ok(raw) => parse(key, raw),
            Err(e) => {
                tracing::error!("Failed to read {}: {}", key, e);
                T::default()
            }
        }
    }

    /// Current value for a read-modify-write. A failed read is returned
    /// rather than replaced by the empty collection, which would then be
    /// written back over everything stored.
    fn load_for_update<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<T> {
        let raw = self.kv.get(key).map_err(|e| {
            tracing::error!("Failed to read {} before update: {}", key, e);
            StoreError::Storage(e)
        })?;
        Ok(parse(key, raw))
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::Storage(e.into()))?;
        self.kv.set(key, &json).map_err(|e| {
            tracing::error!("Failed to write {}: {}", key, e);
            StoreError::Storage(e)
        })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.kv.remove(key).map_err(|e| {
            tracing::error!("Failed to remove {}: {}", key, e);
            StoreError::Storage(e)
        })
    }

    fn writable(&self, op: &str) -> bool {
        if !self.env.has_durable_storage {
            tracing::warn!("No durable storage, ignoring {}", op);
        }
        self.env.has_durable_storage
    }

    fn update_play_records(&self, f: impl FnOnce(&mut PlayRecords)) -> StoreResult<()> {
        let mut records: PlayRecords = self.load_for_update(PLAY_RECORDS_KEY)?;
        f(&mut records);
        self.store(PLAY_RECORDS_KEY, &records)?;
        self.bus.publish(DataEvent::PlayRecordsUpdated(records));
        Ok(())
    }

    fn update_favorites(&self, f: impl FnOnce(&mut Favorites)) -> StoreResult<()> {
        let mut favorites: Favorites = self.load_for_update(FAVORITES_KEY)?;
        f(&mut favorites);
        self.store(FAVORITES_KEY, &favorites)?;
        self.bus.publish(DataEvent::FavoritesUpdated(favorites));
        Ok(())
    }

    fn replace_search_history(&self, history: SearchHistory) -> StoreResult<()> {
        self.store(SEARCH_HISTORY_KEY, &history)?;
        self.bus.publish(DataEvent::SearchHistoryUpdated(history));
        Ok(())
    }
}

/// Malformed stored values are treated as absent.
fn parse<T: DeserializeOwned + Default>(key: &str, raw: Option<String>) -> T {
    let Some(raw) = raw else {
        return T::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!("Ignoring malformed {}: {}", key, e);
        T::default()
    })
}

#[async_trait]
impl UserDataStore for LocalStore {
    fn mode(&self) -> StorageMode {
        StorageMode::LocalOnly
    }

    async fn get_all_play_records(&self) -> PlayRecords {
        self.load(PLAY_RECORDS_KEY)
    }

    async fn save_play_record(&self, source: &str, id: &str, record: PlayRecord) -> StoreResult<()> {
        if !self.writable("play record save") {
            return Ok(());
        }
        let key = make_key(source, id);
        self.update_play_records(|records| {
            records.insert(key, record);
        })
    }

    async fn delete_play_record(&self, source: &str, id: &str) -> StoreResult<()> {
        if !self.writable("play record delete") {
            return Ok(());
        }
        let key = make_key(source, id);
        self.update_play_records(|records| {
            records.remove(&key);
        })
    }

    async fn clear_all_play_records(&self) -> StoreResult<()> {
        if !self.writable("play record clear") {
            return Ok(());
        }
        self.remove(PLAY_RECORDS_KEY)?;
        self.bus.publish(DataEvent::PlayRecordsUpdated(PlayRecords::new()));
        Ok(())
    }

    async fn get_all_favorites(&self) -> Favorites {
        self.load(FAVORITES_KEY)
    }

    async fn save_favorite(&self, source: &str, id: &str, favorite: Favorite) -> StoreResult<()> {
        if !self.writable("favorite save") {
            return Ok(());
        }
        let key = make_key(source, id);
        self.update_favorites(|favorites| {
            favorites.insert(key, favorite);
        })
    }

    async fn delete_favorite(&self, source: &str, id: &str) -> StoreResult<()> {
        if !self.writable("favorite delete") {
            return Ok(());
        }
        let key = make_key(source, id);
        self.update_favorites(|favorites| {
            favorites.remove(&key);
        })
    }

    async fn is_favorited(&self, source: &str, id: &str) -> bool {
        let favorites: Favorites = self.load(FAVORITES_KEY);
        favorites.contains_key(&make_key(source, id))
    }

    async fn clear_all_favorites(&self) -> StoreResult<()> {
        if !self.writable("favorite clear") {
            return Ok(());
        }
        self.remove(FAVORITES_KEY)?;
        self.bus.publish(DataEvent::FavoritesUpdated(Favorites::new()));
        Ok(())
    }

    async fn get_search_history(&self) -> SearchHistory {
        self.load(SEARCH_HISTORY_KEY)
    }

    async fn add_search_history(&self, keyword: &str) -> StoreResult<()> {
        if !self.writable("search history add") {
            return Ok(());
        }
        let history: SearchHistory = self.load_for_update(SEARCH_HISTORY_KEY)?;
        match push_search_term(&history, keyword) {
            Some(next) => self.replace_search_history(next),
            None => Ok(()),
        }
    }

    async fn delete_search_history(&self, keyword: &str) -> StoreResult<()> {
        if !self.writable("search history delete") || keyword.trim().is_empty() {
            return Ok(());
        }
        let history: SearchHistory = self.load_for_update(SEARCH_HISTORY_KEY)?;
        self.replace_search_history(remove_search_term(&history, keyword))
    }

    async fn clear_search_history(&self) -> StoreResult<()> {
        if !self.writable("search history clear") {
            return Ok(());
        }
        self.remove(SEARCH_HISTORY_KEY)?;
        self.bus.publish(DataEvent::SearchHistoryUpdated(SearchHistory::new()));
        Ok(())
    }
}
