#![allow(dead_code)]

use std::time::Duration;

use reelsync::{DataEvent, Favorite, PlayRecord, PlayRecords};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn create_test_record(title: &str) -> PlayRecord {
    PlayRecord {
        title: title.to_string(),
        source_name: "tmdb".to_string(),
        year: "2022".to_string(),
        cover: "https://img.example/cover.jpg".to_string(),
        index: 3,
        total_episodes: 12,
        play_time: 845.5,
        total_time: 2700.0,
        save_time: 1_700_000_000_000,
        search_title: None,
    }
}

pub fn create_test_favorite(title: &str) -> Favorite {
    Favorite {
        title: title.to_string(),
        source_name: "tmdb".to_string(),
        year: "2022".to_string(),
        cover: String::new(),
        total_episodes: 12,
        save_time: 1_700_000_000_000,
        search_title: None,
    }
}

/// Records keyed by `keys`, titled after their key.
pub fn records(keys: &[&str]) -> PlayRecords {
    keys.iter()
        .map(|k| (k.to_string(), create_test_record(k)))
        .collect()
}

pub async fn next_event(rx: &mut UnboundedReceiver<DataEvent>) -> DataEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}
