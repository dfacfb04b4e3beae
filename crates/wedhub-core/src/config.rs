use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::guard::GuardConfig;
use crate::recent::DEFAULT_RECENT_LIMIT;

/// Main configuration structure
///
/// Loaded from the config file, then CLI flags and env vars win.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load config from default location, or defaults if there isn't one
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> crate::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)
                .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to disk
    pub fn save(&self) -> crate::Result<PathBuf> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// XDG config dir on Linux, the platform equivalent elsewhere
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("wedhub");

        Ok(config_dir.join("config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Project URL of the hosted backend, e.g. https://xyz.example.co
    pub url: Option<String>,

    /// Public (anon) API key
    pub api_key: Option<String>,

    /// Signed-in user's access token, if not passed on the command line
    pub access_token: Option<String>,

    #[serde(default = "default_saved_table")]
    pub saved_table: String,

    /// Embedded vendor resource for the saved select; empty disables the join
    #[serde(default = "default_vendor_join")]
    pub vendor_join: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_saved_table() -> String {
    crate::providers::rest::DEFAULT_SAVED_TABLE.to_string()
}

fn default_vendor_join() -> String {
    crate::providers::rest::DEFAULT_VENDOR_JOIN.to_string()
}

fn default_timeout() -> u64 {
    15
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            access_token: None,
            saved_table: default_saved_table(),
            vendor_join: default_vendor_join(),
            timeout_secs: default_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// SQLite file; defaults to the platform data dir
    pub path: Option<PathBuf>,

    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            recent_limit: default_recent_limit(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?
            .join("wedhub");
        Ok(data_dir.join("wedhub.db"))
    }
}
