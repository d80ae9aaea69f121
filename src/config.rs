use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR: &str = "reelsync";
const DATA_FILE_NAME: &str = "userdata.redb";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub user: UserConfig,
}

/// Persistence backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "localstorage", "redis", "d1" or "upstash"
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Base URL of the user-data API (remote modes only)
    pub remote_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "localstorage".to_string(),
            remote_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Local cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached collection stays valid
    pub expiry_secs: u64,
    /// Delay before the one-shot expired-cache sweep
    pub sweep_delay_ms: u64,
    /// Database file (None = default data dir)
    pub data_file: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 3600,
            sweep_delay_ms: 1000,
            data_file: None,
        }
    }
}

/// Current user identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Username owning the per-user cache (None = anonymous)
    pub username: Option<String>,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists.
    /// Environment overrides are applied on top.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .context("Failed to read config file")?;

            toml::from_str::<Config>(&contents)
                .context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Apply `STORAGE_TYPE`, `REELSYNC_REMOTE_URL` and `REELSYNC_USERNAME`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("STORAGE_TYPE").filter(|v| !v.trim().is_empty()) {
            self.storage.storage_type = kind;
        }
        if let Some(url) = lookup("REELSYNC_REMOTE_URL").filter(|v| !v.trim().is_empty()) {
            self.storage.remote_url = url;
        }
        if let Some(name) = lookup("REELSYNC_USERNAME").filter(|v| !v.trim().is_empty()) {
            self.user.username = Some(name);
        }
    }

    /// Resolved path of the durable storage file
    pub fn data_file_path(&self) -> Result<PathBuf> {
        if let Some(ref custom) = self.cache.data_file {
            if !custom.trim().is_empty() {
                return Ok(PathBuf::from(custom));
            }
        }

        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join(APP_DIR);
        fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;
        Ok(data_dir.join(DATA_FILE_NAME))
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.storage.storage_type, "localstorage");
        assert_eq!(config.storage.remote_url, "http://localhost:3000");
        assert_eq!(config.storage.request_timeout_secs, 10);
        assert_eq!(config.cache.expiry_secs, 3600);
        assert_eq!(config.cache.sweep_delay_ms, 1000);
        assert!(config.cache.data_file.is_none());
        assert!(config.user.username.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[storage]
type = "redis"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.storage.storage_type, "redis");
        assert_eq!(config.storage.request_timeout_secs, 10);
        assert_eq!(config.cache.expiry_secs, 3600);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[storage]
type = "d1"
remote_url = "https://media.example.com"
request_timeout_secs = 3

[cache]
expiry_secs = 60
sweep_delay_ms = 0
data_file = "/tmp/reelsync.redb"

[user]
username = "alice"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.storage.storage_type, "d1");
        assert_eq!(config.storage.remote_url, "https://media.example.com");
        assert_eq!(config.storage.request_timeout_secs, 3);
        assert_eq!(config.cache.expiry_secs, 60);
        assert_eq!(config.cache.sweep_delay_ms, 0);
        assert_eq!(config.data_file_path().unwrap(), PathBuf::from("/tmp/reelsync.redb"));
        assert_eq!(config.user.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_data_file_unset_by_default() {
        assert!(!Config::example_config().contains("data_file"));

        let blank: Config = toml::from_str("[cache]\ndata_file = \"\"\n").unwrap();
        assert_eq!(blank.cache.data_file.as_deref(), Some(""));

        let custom: Config = toml::from_str("[cache]\ndata_file = \"/srv/u.redb\"\n").unwrap();
        assert_eq!(custom.data_file_path().unwrap(), PathBuf::from("/srv/u.redb"));
    }

    #[test]
    fn test_unknown_storage_type_still_parses() {
        let config: Config = toml::from_str("[storage]\ntype = \"cassandra\"\n").unwrap();
        assert_eq!(config.storage.storage_type, "cassandra");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STORAGE_TYPE", "upstash"),
            ("REELSYNC_REMOTE_URL", "http://10.0.0.2:3000"),
            ("REELSYNC_USERNAME", "bob"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.storage_type, "upstash");
        assert_eq!(config.storage.remote_url, "http://10.0.0.2:3000");
        assert_eq!(config.user.username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.storage.storage_type, "localstorage");
        assert!(config.user.username.is_none());
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
