//! Storage backend selection.
//!
//! Decided once at startup from configuration. `localstorage` keeps every
//! collection in durable local storage only; the remote kinds all use the
//! hybrid cache strategy against the user-data API.

use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;

/// Configured persistence kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    LocalStorage,
    Redis,
    D1,
    Upstash,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::LocalStorage => write!(f, "localstorage"),
            StorageType::Redis => write!(f, "redis"),
            StorageType::D1 => write!(f, "d1"),
            StorageType::Upstash => write!(f, "upstash"),
        }
    }
}

impl std::str::FromStr for StorageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "localstorage" | "local" => Ok(StorageType::LocalStorage),
            "redis" => Ok(StorageType::Redis),
            "d1" => Ok(StorageType::D1),
            "upstash" => Ok(StorageType::Upstash),
            _ => Err(anyhow::anyhow!("Unknown storage type: {}", s)),
        }
    }
}

/// Active persistence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Durable local storage is the system of record. No network.
    LocalOnly,
    /// Remote store is the source of truth, fronted by the local cache.
    Remote(StorageType),
}

impl StorageMode {
    pub fn is_remote(&self) -> bool {
        matches!(self, StorageMode::Remote(_))
    }

    pub fn name(&self) -> String {
        match self {
            StorageMode::LocalOnly => StorageType::LocalStorage.to_string(),
            StorageMode::Remote(kind) => kind.to_string(),
        }
    }
}

/// Capabilities of the process the store runs in, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    pub has_durable_storage: bool,
    pub has_network: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            has_durable_storage: true,
            has_network: true,
        }
    }
}

/// Resolve the storage mode from configuration.
///
/// Unrecognized or empty values fall back to [`StorageMode::LocalOnly`].
pub fn resolve_backend(config: &StorageConfig) -> StorageMode {
    match config.storage_type.parse::<StorageType>() {
        Ok(StorageType::LocalStorage) | Err(_) => StorageMode::LocalOnly,
        Ok(kind) => StorageMode::Remote(kind),
    }
}

/// Resolve the mode, downgrading a remote mode when the environment has no
/// network access.
pub fn resolve_for_environment(config: &StorageConfig, env: Environment) -> StorageMode {
    let mode = resolve_backend(config);
    if mode.is_remote() && !env.has_network {
        tracing::warn!(
            "Storage type '{}' needs network access; falling back to local storage",
            mode.name()
        );
        return StorageMode::LocalOnly;
    }
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_config(kind: &str) -> StorageConfig {
        StorageConfig {
            storage_type: kind.to_string(),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_default_is_local_only() {
        assert_eq!(resolve_backend(&StorageConfig::default()), StorageMode::LocalOnly);
    }

    #[test]
    fn test_remote_kinds() {
        assert_eq!(
            resolve_backend(&storage_config("redis")),
            StorageMode::Remote(StorageType::Redis)
        );
        assert_eq!(
            resolve_backend(&storage_config("D1")),
            StorageMode::Remote(StorageType::D1)
        );
        assert_eq!(
            resolve_backend(&storage_config(" upstash ")),
            StorageMode::Remote(StorageType::Upstash)
        );
    }

    #[test]
    fn test_unrecognized_falls_back_to_local() {
        assert_eq!(resolve_backend(&storage_config("mongodb")), StorageMode::LocalOnly);
        assert_eq!(resolve_backend(&storage_config("")), StorageMode::LocalOnly);
    }

    #[test]
    fn test_no_network_downgrades_remote() {
        let env = Environment {
            has_durable_storage: true,
            has_network: false,
        };
        assert_eq!(
            resolve_for_environment(&storage_config("redis"), env),
            StorageMode::LocalOnly
        );
        assert_eq!(
            resolve_for_environment(&storage_config("redis"), Environment::default()),
            StorageMode::Remote(StorageType::Redis)
        );
    }

    #[test]
    fn test_mode_name() {
        assert_eq!(StorageMode::LocalOnly.name(), "localstorage");
        assert_eq!(StorageMode::Remote(StorageType::D1).name(), "d1");
    }
}
