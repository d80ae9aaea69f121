//! In-process change notifications for the user-data collections.
//!
//! Delivery is synchronous: `publish` calls every handler registered for the
//! event's kind at that moment, on the caller's thread, before returning.
//! Nothing is queued or replayed for late subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::model::{Favorites, PlayRecords, SearchHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayRecordsUpdated,
    FavoritesUpdated,
    SearchHistoryUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlayRecordsUpdated => "playRecordsUpdated",
            EventKind::FavoritesUpdated => "favoritesUpdated",
            EventKind::SearchHistoryUpdated => "searchHistoryUpdated",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection changed; carries the full new collection.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    PlayRecordsUpdated(PlayRecords),
    FavoritesUpdated(Favorites),
    SearchHistoryUpdated(SearchHistory),
}

impl DataEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DataEvent::PlayRecordsUpdated(_) => EventKind::PlayRecordsUpdated,
            DataEvent::FavoritesUpdated(_) => EventKind::FavoritesUpdated,
            DataEvent::SearchHistoryUpdated(_) => EventKind::SearchHistoryUpdated,
        }
    }
}

type Handler = Arc<dyn Fn(&DataEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, kind: EventKind, id: u64) {
        // Dropped outside the lock: a handler may own a Subscription.
        let _removed: Vec<(u64, Handler)> = {
            let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            match handlers.get_mut(&kind) {
                Some(list) => {
                    let (removed, kept) = std::mem::take(list)
                        .into_iter()
                        .partition(|(hid, _)| *hid == id);
                    *list = kept;
                    removed
                }
                None => Vec::new(),
            }
        };
    }
}

/// Publish/subscribe hub shared by the stores and their observers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. The handler stays registered until the
    /// returned [`Subscription`] is unsubscribed or dropped.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&DataEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
            active: true,
        }
    }

    /// Forward events of `kind` into an unbounded channel.
    pub fn subscribe_channel(&self, kind: EventKind) -> (Subscription, mpsc::UnboundedReceiver<DataEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(kind, move |event| {
            // Receiver gone means the observer was torn down.
            let _ = tx.send(event.clone());
        });
        (sub, rx)
    }

    /// Deliver `event` to every current subscriber of its kind.
    pub fn publish(&self, event: DataEvent) {
        let kind = event.kind();
        // Snapshot so handlers can (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = {
            let handlers = self.registry.handlers.lock().unwrap_or_else(|e| e.into_inner());
            match handlers.get(&kind) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };

        tracing::debug!("Publishing {} to {} subscribers", kind, handlers.len());
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Handle for one registered handler.
pub struct Subscription {
    registry: Weak<Registry>,
    kind: EventKind,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Remove the handler. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
