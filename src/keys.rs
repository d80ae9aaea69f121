//! Composite storage keys for collections keyed by (source, id).
//!
//! Neither part is escaped. A source containing `+` can collide with another
//! (source, id) pair; callers are expected to pass provider names that don't.

pub const KEY_SEPARATOR: char = '+';

/// Build the storage key for an item from its source and id.
pub fn make_key(source: &str, id: &str) -> String {
    format!("{source}{KEY_SEPARATOR}{id}")
}

/// Split a storage key back into (source, id) at the first separator.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(KEY_SEPARATOR)
}
