use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of search terms kept, most recent first.
pub const SEARCH_HISTORY_LIMIT: usize = 20;

/// Playback progress for one title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub title: String,
    pub source_name: String,
    pub year: String,
    pub cover: String,
    /// Episode currently being watched (1-based).
    pub index: u32,
    pub total_episodes: u32,
    /// Playback position in seconds.
    pub play_time: f64,
    /// Episode length in seconds.
    pub total_time: f64,
    /// Milliseconds since the Unix epoch.
    pub save_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_title: Option<String>,
}

/// A bookmarked title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub title: String,
    pub source_name: String,
    pub year: String,
    pub cover: String,
    pub total_episodes: u32,
    /// Milliseconds since the Unix epoch.
    pub save_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_title: Option<String>,
}

/// Play records keyed by `source+id`.
pub type PlayRecords = BTreeMap<String, PlayRecord>;

/// Favorites keyed by `source+id`.
pub type Favorites = BTreeMap<String, Favorite>;

/// Ordered search terms, most recent first.
pub type SearchHistory = Vec<String>;

/// Move `term` (trimmed) to the front of `history`, dropping any earlier copy
/// and truncating to [`SEARCH_HISTORY_LIMIT`].
///
/// Returns `None` when the trimmed term is empty, leaving the caller to no-op.
pub fn push_search_term(history: &[String], term: &str) -> Option<SearchHistory> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut next = Vec::with_capacity(history.len() + 1);
    next.push(trimmed.to_string());
    next.extend(history.iter().filter(|k| k.as_str() != trimmed).cloned());
    next.truncate(SEARCH_HISTORY_LIMIT);
    Some(next)
}

/// Drop every occurrence of `term` (trimmed) from `history`.
pub fn remove_search_term(history: &[String], term: &str) -> SearchHistory {
    let trimmed = term.trim();
    history
        .iter()
        .filter(|k| k.as_str() != trimmed)
        .cloned()
        .collect()
}
