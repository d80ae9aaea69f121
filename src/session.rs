//! Current user identity.
//!
//! The per-user cache is keyed by username. A session with no username is
//! anonymous: nothing is cached for it.

use std::sync::RwLock;

use serde::Deserialize;

const AUTH_COOKIE: &str = "auth";

#[derive(Deserialize)]
struct AuthInfo {
    username: Option<String>,
}

/// Holds the logged-in username. Shared by the stores and the caller.
#[derive(Debug, Default)]
pub struct Session {
    username: RwLock<Option<String>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_username(username: Option<String>) -> Self {
        Self {
            username: RwLock::new(normalize(username)),
        }
    }

    /// Recover the user from a `Cookie` header carrying the `auth` cookie
    /// (URL-encoded JSON with a `username` field).
    pub fn from_cookie_header(header: &str) -> Self {
        Self::with_username(username_from_cookie(header))
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn login(&self, username: &str) {
        *self.username.write().unwrap_or_else(|e| e.into_inner()) = normalize(Some(username.to_string()));
    }

    pub fn logout(&self) {
        *self.username.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

fn normalize(username: Option<String>) -> Option<String> {
    username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
}

/// Extract the username from the `auth` cookie, if present and readable.
pub fn username_from_cookie(header: &str) -> Option<String> {
    let raw = header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name.trim() == AUTH_COOKIE).then(|| value.trim())
    })?;

    // Some clients encode the value twice.
    let mut decoded = urlencoding::decode(raw).ok()?.into_owned();
    if decoded.starts_with('%') {
        decoded = urlencoding::decode(&decoded).ok()?.into_owned();
    }

    let info: AuthInfo = serde_json::from_str(&decoded).ok()?;
    normalize(info.username)
}
