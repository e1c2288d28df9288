//! Durable token storage.
//!
//! A `SecretStore` is a plain string key/value backend. `TokenStorage` sits on
//! top of one and enforces the pair rule: `access_token` and `refresh_token`
//! are written and cleared together, and a backend holding only one of them
//! is treated as empty.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Failed to write {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Token file is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    fn read(key: &str, reason: impl ToString) -> Self {
        StorageError::Read { key: key.to_string(), reason: reason.to_string() }
    }

    fn write(key: &str, reason: impl ToString) -> Self {
        StorageError::Write { key: key.to_string(), reason: reason.to_string() }
    }
}

pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenStorage {
    backend: Box<dyn SecretStore>,
}

impl TokenStorage {
    pub fn new(backend: impl SecretStore + 'static) -> Self {
        Self { backend: Box::new(backend) }
    }

    /// Load the stored pair. A half-present pair is cleared and reported as
    /// absent.
    pub fn load(&self) -> Result<Option<TokenPair>, StorageError> {
        let access = self.backend.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.backend.get(REFRESH_TOKEN_KEY)?;
        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(TokenPair {
                access_token,
                refresh_token,
            })),
            (None, None) => Ok(None),
            _ => {
                warn!("Found a partial token pair in storage, clearing it");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn save(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        self.backend.set(ACCESS_TOKEN_KEY, &tokens.access_token)?;
        if let Err(e) = self.backend.set(REFRESH_TOKEN_KEY, &tokens.refresh_token) {
            // Do not leave a new access token paired with an old refresh token.
            let _ = self.backend.remove(ACCESS_TOKEN_KEY);
            return Err(e);
        }
        debug!("Token pair saved");
        Ok(())
    }

    pub fn save_access_token(&self, access_token: &str) -> Result<(), StorageError> {
        self.backend.set(ACCESS_TOKEN_KEY, access_token)
    }

    /// Remove both keys. Both removals are attempted even if the first fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        let access = self.backend.remove(ACCESS_TOKEN_KEY);
        let refresh = self.backend.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

/// In-process backend. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a key, for inspection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().map(|e| e.is_empty()).unwrap_or(true)
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|e| StorageError::read(key, e))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|e| StorageError::write(key, e))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|e| StorageError::write(key, e))?;
        entries.remove(key);
        Ok(())
    }
}

/// Backend persisting the keys to `session.json` in the cache directory.
pub struct FileStore {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir, lock: Mutex::new(()) }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn read_entries(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| StorageError::read(key, e))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    fn write_entries(&self, key: &str, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let path = self.session_path();
        if entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| StorageError::write(key, e))?;
            }
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::write(key, e))?;
        }
        let contents = serde_json::to_string_pretty(entries).map_err(|e| StorageError::write(key, e))?;
        std::fs::write(&path, contents).map_err(|e| StorageError::write(key, e))
    }

    fn modify(
        &self,
        key: &str,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|e| StorageError::write(key, e))?;
        let mut entries = self.read_entries(key)?;
        apply(&mut entries);
        self.write_entries(key, &entries)
    }
}

impl SecretStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|e| StorageError::read(key, e))?;
        Ok(self.read_entries(key)?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(key, |entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(key, |entries| {
            entries.remove(key);
        })
    }
}
