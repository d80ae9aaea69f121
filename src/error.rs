//! Error types for remote calls and store writes.

use thiserror::Error;

/// A failed round trip to the user-data API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A failed write through the user-data store.
///
/// For remote modes this is only returned after the cache has been
/// reconciled with the server.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
