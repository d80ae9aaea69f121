//! HTTP client for the user-data API.
//!
//! ```text
//! GET    /api/playrecords               → {key: PlayRecord}
//! POST   /api/playrecords   {key, record}
//! DELETE /api/playrecords?key=…
//! DELETE /api/playrecords               (clear all)
//! GET    /api/favorites                 → {key: Favorite}
//! POST   /api/favorites     {key, favorite}
//! DELETE /api/favorites?key=…
//! DELETE /api/favorites
//! GET    /api/searchhistory             → [keyword]
//! POST   /api/searchhistory {keyword}
//! DELETE /api/searchhistory?keyword=…
//! DELETE /api/searchhistory
//! ```
//!
//! One round trip per call, no retries. Caching policy lives in
//! [`crate::storage::hybrid`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::model::{Favorite, Favorites, PlayRecord, PlayRecords, SearchHistory};

const PLAY_RECORDS_PATH: &str = "/api/playrecords";
const FAVORITES_PATH: &str = "/api/favorites";
const SEARCH_HISTORY_PATH: &str = "/api/searchhistory";

/// CRUD surface of the remote source of truth.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    // ── Play records ────────────────────────────────────────────────

    async fn fetch_play_records(&self) -> Result<PlayRecords, RemoteError>;

    async fn persist_play_record(&self, key: &str, record: &PlayRecord) -> Result<(), RemoteError>;

    async fn delete_play_record(&self, key: &str) -> Result<(), RemoteError>;

    async fn clear_play_records(&self) -> Result<(), RemoteError>;

    // ── Favorites ───────────────────────────────────────────────────

    async fn fetch_favorites(&self) -> Result<Favorites, RemoteError>;

    async fn persist_favorite(&self, key: &str, favorite: &Favorite) -> Result<(), RemoteError>;

    async fn delete_favorite(&self, key: &str) -> Result<(), RemoteError>;

    async fn clear_favorites(&self) -> Result<(), RemoteError>;

    // ── Search history ──────────────────────────────────────────────

    async fn fetch_search_history(&self) -> Result<SearchHistory, RemoteError>;

    async fn add_search_term(&self, keyword: &str) -> Result<(), RemoteError>;

    async fn delete_search_term(&self, keyword: &str) -> Result<(), RemoteError>;

    async fn clear_search_history(&self) -> Result<(), RemoteError>;
}

#[derive(Serialize)]
struct RecordBody<'a> {
    key: &'a str,
    record: &'a PlayRecord,
}

#[derive(Serialize)]
struct FavoriteBody<'a> {
    key: &'a str,
    favorite: &'a Favorite,
}

#[derive(Serialize)]
struct KeywordBody<'a> {
    keyword: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// reqwest-backed [`RemoteSource`].
pub struct HttpRemote {
    base_url: String,
    /// Forwarded as the `Cookie` header so the API can identify the user.
    cookie: Option<String>,
    http_client: HttpClient,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: None,
            http_client,
        })
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn prepare(&self, req: RequestBuilder) -> RequestBuilder {
        match self.cookie {
            Some(ref cookie) => req.header(header::COOKIE, cookie),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = self
            .prepare(req)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body
                }
            });
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let resp = self.send(self.http_client.get(self.url(path))).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), RemoteError> {
        self.send(self.http_client.post(self.url(path)).json(body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, path: &str, query: Option<(&str, &str)>) -> Result<(), RemoteError> {
        let mut req = self.http_client.delete(self.url(path));
        if let Some(pair) = query {
            req = req.query(&[pair]);
        }
        self.send(req).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn fetch_play_records(&self) -> Result<PlayRecords, RemoteError> {
        self.get_json(PLAY_RECORDS_PATH).await
    }

    async fn persist_play_record(&self, key: &str, record: &PlayRecord) -> Result<(), RemoteError> {
        self.post_json(PLAY_RECORDS_PATH, &RecordBody { key, record }).await
    }

    async fn delete_play_record(&self, key: &str) -> Result<(), RemoteError> {
        self.delete(PLAY_RECORDS_PATH, Some(("key", key))).await
    }

    async fn clear_play_records(&self) -> Result<(), RemoteError> {
        self.delete(PLAY_RECORDS_PATH, None).await
    }

    async fn fetch_favorites(&self) -> Result<Favorites, RemoteError> {
        self.get_json(FAVORITES_PATH).await
    }

    async fn persist_favorite(&self, key: &str, favorite: &Favorite) -> Result<(), RemoteError> {
        self.post_json(FAVORITES_PATH, &FavoriteBody { key, favorite }).await
    }

    async fn delete_favorite(&self, key: &str) -> Result<(), RemoteError> {
        self.delete(FAVORITES_PATH, Some(("key", key))).await
    }

    async fn clear_favorites(&self) -> Result<(), RemoteError> {
        self.delete(FAVORITES_PATH, None).await
    }

    async fn fetch_search_history(&self) -> Result<SearchHistory, RemoteError> {
        self.get_json(SEARCH_HISTORY_PATH).await
    }

    async fn add_search_term(&self, keyword: &str) -> Result<(), RemoteError> {
        self.post_json(SEARCH_HISTORY_PATH, &KeywordBody { keyword }).await
    }

    async fn delete_search_term(&self, keyword: &str) -> Result<(), RemoteError> {
        self.delete(SEARCH_HISTORY_PATH, Some(("keyword", keyword))).await
    }

    async fn clear_search_history(&self) -> Result<(), RemoteError> {
        self.delete(SEARCH_HISTORY_PATH, None).await
    }
}
