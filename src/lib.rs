//! User data (play records, favorites, search history) for a media
//! aggregation client, kept either purely local or synchronized with a remote
//! API through a per-user cache.
//!
//! Open a store with [`storage::open`] and observe changes on the
//! [`events::EventBus`] handed to it.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod kv;
pub mod model;
pub mod remote;
pub mod session;
pub mod storage;

pub use error::{RemoteError, StoreError, StoreResult};
pub use events::{DataEvent, EventBus, EventKind, Subscription};
pub use model::{Favorite, Favorites, PlayRecord, PlayRecords, SearchHistory};
pub use storage::{CacheStatus, UserDataStore};
