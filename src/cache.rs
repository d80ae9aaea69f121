//! Per-user cache of the three user-data collections.
//!
//! Each user gets one JSON blob under `reelsync_cache_{username}`:
//!
//! ```text
//! {
//!   "playRecords":   {"data": {...}, "timestamp": <ms>, "version": "1.0.0"},
//!   "favorites":     {"data": {...}, "timestamp": <ms>, "version": "1.0.0"},
//!   "searchHistory": {"data": [...], "timestamp": <ms>, "version": "1.0.0"}
//! }
//! ```
//!
//! A collection is written wholesale on every cache write. Storage errors and
//! corrupt blobs are logged and read back as "no cache".

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::kv::KvStore;
use crate::model::{Favorites, PlayRecords, SearchHistory};

pub const CACHE_PREFIX: &str = "reelsync_cache_";
pub const CACHE_VERSION: &str = "1.0.0";
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// A cached collection stamped with write time and schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    pub data: T,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub version: String,
}

impl<T> CacheEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            timestamp: now_ms(),
            version: CACHE_VERSION.to_string(),
        }
    }
}

/// Everything cached for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCacheStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_records: Option<CacheEnvelope<PlayRecords>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorites: Option<CacheEnvelope<Favorites>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_history: Option<CacheEnvelope<SearchHistory>>,
}

/// Envelope header only, used by the sweep so a blob whose data no longer
/// matches the current types can still be judged by version and age.
#[derive(Deserialize)]
struct EnvelopeHeader {
    timestamp: i64,
    version: String,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Reads and writes user cache blobs in a [`KvStore`].
///
/// Owns the serialized representation; it never decides whether the cache
/// is authoritative.
///
/// Every read-modify-write of a blob holds `write_lock`, so writers touching
/// different collections of the same user never drop each other's updates.
pub struct CacheManager {
    kv: Arc<dyn KvStore>,
    expiry_ms: i64,
    write_lock: Mutex<()>,
}

impl CacheManager {
    pub fn new(kv: Arc<dyn KvStore>, expiry: Duration) -> Self {
        Self {
            kv,
            expiry_ms: expiry.as_millis().min(i64::MAX as u128) as i64,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cache_key(username: &str) -> String {
        format!("{CACHE_PREFIX}{username}")
    }

    /// Load a user's cache blob. Missing or unreadable blobs yield an empty store.
    pub fn get_user_cache(&self, username: &str) -> UserCacheStore {
        let key = Self::cache_key(username);
        let raw = match self.kv.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return UserCacheStore::default(),
            Err(e) => {
                tracing::warn!("Could not read user cache for {}: {}", username, e);
                return UserCacheStore::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("User cache for {} is corrupt, ignoring: {}", username, e);
                UserCacheStore::default()
            }
        }
    }

    /// Persist a user's cache blob. Failures are logged, not returned.
    pub fn save_user_cache(&self, username: &str, store: &UserCacheStore) {
        let key = Self::cache_key(username);
        let result = serde_json::to_string(store)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.kv.set(&key, &json));
        if let Err(e) = result {
            tracing::warn!("Could not save user cache for {}: {}", username, e);
        }
    }

    pub fn is_valid<T>(&self, envelope: &CacheEnvelope<T>) -> bool {
        self.is_fresh(&envelope.version, envelope.timestamp, now_ms())
    }

    /// Version matches and `now - timestamp` is inside the expiry window.
    pub fn is_valid_at<T>(&self, envelope: &CacheEnvelope<T>, now: i64) -> bool {
        self.is_fresh(&envelope.version, envelope.timestamp, now)
    }

    fn is_fresh(&self, version: &str, timestamp: i64, now: i64) -> bool {
        version == CACHE_VERSION && now.saturating_sub(timestamp) < self.expiry_ms
    }

    // ── Typed accessors ─────────────────────────────────────────────

    pub fn cached_play_records(&self, username: &str) -> Option<PlayRecords> {
        self.get_user_cache(username)
            .play_records
            .filter(|env| self.is_valid(env))
            .map(|env| env.data)
    }

    pub fn cache_play_records(&self, username: &str, data: PlayRecords) {
        self.update(username, |store| store.play_records = Some(CacheEnvelope::new(data)));
    }

    pub fn cached_favorites(&self, username: &str) -> Option<Favorites> {
        self.get_user_cache(username)
            .favorites
            .filter(|env| self.is_valid(env))
            .map(|env| env.data)
    }

    pub fn cache_favorites(&self, username: &str, data: Favorites) {
        self.update(username, |store| store.favorites = Some(CacheEnvelope::new(data)));
    }

    pub fn cached_search_history(&self, username: &str) -> Option<SearchHistory> {
        self.get_user_cache(username)
            .search_history
            .filter(|env| self.is_valid(env))
            .map(|env| env.data)
    }

    pub fn cache_search_history(&self, username: &str, data: SearchHistory) {
        self.update(username, |store| store.search_history = Some(CacheEnvelope::new(data)));
    }

    /// Forget one collection so the next read fetches it again.
    pub fn invalidate_play_records(&self, username: &str) {
        self.update(username, |store| store.play_records = None);
    }

    pub fn invalidate_favorites(&self, username: &str) {
        self.update(username, |store| store.favorites = None);
    }

    pub fn invalidate_search_history(&self, username: &str) {
        self.update(username, |store| store.search_history = None);
    }

    fn update(&self, username: &str, f: impl FnOnce(&mut UserCacheStore)) {
        let _guard = self.lock();
        let mut store = self.get_user_cache(username);
        f(&mut store);
        self.save_user_cache(username, &store);
    }

    // ── Housekeeping ────────────────────────────────────────────────

    /// Drop a user's whole cache blob.
    pub fn clear_user(&self, username: &str) {
        let _guard = self.lock();
        if let Err(e) = self.kv.remove(&Self::cache_key(username)) {
            tracing::warn!("Could not clear user cache for {}: {}", username, e);
        }
    }

    /// Delete every cache blob with no valid collection left, including blobs
    /// that no longer parse. Returns the number of blobs removed.
    pub fn clear_expired(&self) -> usize {
        self.clear_expired_at(now_ms())
    }

    pub fn clear_expired_at(&self, now: i64) -> usize {
        let keys = match self.kv.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Could not list cache entries: {}", e);
                return 0;
            }
        };

        let _guard = self.lock();
        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(CACHE_PREFIX)) {
            let keep = match self.kv.get(key) {
                Ok(Some(raw)) => self.has_valid_collection(&raw, now),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Could not read cache entry {}: {}", key, e);
                    continue;
                }
            };
            if keep {
                continue;
            }
            match self.kv.remove(key) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Could not remove cache entry {}: {}", key, e),
            }
        }

        tracing::debug!("Expired cache sweep removed {} entries", removed);
        removed
    }

    fn has_valid_collection(&self, raw: &str, now: i64) -> bool {
        let Ok(serde_json::Value::Object(collections)) = serde_json::from_str(raw) else {
            return false;
        };
        collections.into_values().any(|value| {
            serde_json::from_value::<EnvelopeHeader>(value)
                .map(|h| self.is_fresh(&h.version, h.timestamp, now))
                .unwrap_or(false)
        })
    }

    /// Run [`clear_expired`](Self::clear_expired) once after `delay` on a
    /// detached task. Outside a tokio runtime nothing is scheduled.
    pub fn spawn_expired_sweep(self: &Arc<Self>, delay: Duration) -> Option<tokio::task::JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, skipping expired cache sweep");
            return None;
        };
        let manager = Arc::clone(self);
        Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            manager.clear_expired();
        }))
    }
}
