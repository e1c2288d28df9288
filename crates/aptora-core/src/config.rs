//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! backend URL, timeouts, token renewal interval, token storage backend and
//! the last email used to log in.
//!
//! Configuration is stored at `~/.config/aptora/config.json`. The
//! `APTORA_API_URL` and `APTORA_TOKEN_STORAGE` environment variables
//! override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{FileStore, KeyringStore, MemoryStore, TokenStorage};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "aptora";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Access tokens are issued for 15 minutes.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 15 * 60;

/// Renew at 14 minutes, ahead of expiry.
const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 14 * 60;

const ENV_API_URL: &str = "APTORA_API_URL";
const ENV_TOKEN_STORAGE: &str = "APTORA_TOKEN_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorageKind {
    /// OS keychain
    #[default]
    Keyring,
    /// `session.json` in the cache directory
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl FromStr for TokenStorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => bail!("Unknown token storage '{}', expected keyring, file or memory", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub token_lifetime_secs: u64,
    pub renewal_interval_secs: u64,
    pub token_storage: TokenStorageKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            renewal_interval_secs: DEFAULT_RENEWAL_INTERVAL_SECS,
            token_storage: TokenStorageKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default path, apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(kind) = lookup(ENV_TOKEN_STORAGE).filter(|v| !v.trim().is_empty()) {
            self.token_storage = kind
                .parse::<TokenStorageKind>()
                .with_context(|| format!("Invalid {}", ENV_TOKEN_STORAGE))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            bail!("api_base_url must be an http(s) URL, got '{}'", self.api_base_url);
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        if self.renewal_interval_secs == 0 {
            bail!("renewal_interval_secs must be positive");
        }
        if self.renewal_interval_secs >= self.token_lifetime_secs {
            bail!(
                "renewal_interval_secs ({}) must be shorter than token_lifetime_secs ({})",
                self.renewal_interval_secs,
                self.token_lifetime_secs
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    /// Open the configured token storage backend.
    pub fn token_storage(&self) -> Result<TokenStorage> {
        Ok(match self.token_storage {
            TokenStorageKind::Keyring => TokenStorage::new(KeyringStore::new()),
            TokenStorageKind::File => TokenStorage::new(FileStore::new(self.cache_dir()?)),
            TokenStorageKind::Memory => TokenStorage::new(MemoryStore::new()),
        })
    }
}
