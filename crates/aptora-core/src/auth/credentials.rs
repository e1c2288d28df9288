use keyring::Entry;

use super::storage::{SecretStore, StorageError};

const SERVICE_NAME: &str = "aptora";

/// OS keychain backend. Each storage key is its own keychain entry under the
/// `aptora` service.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a different service name, e.g. one per backend environment.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, key: &str) -> Result<Entry, keyring::Error> {
        Entry::new(&self.service, key)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let read_err = |e: keyring::Error| StorageError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        };
        match self.entry(key).map_err(read_err)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(read_err(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let write_err = |e: keyring::Error| StorageError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        };
        self.entry(key).map_err(write_err)?.set_password(value).map_err(write_err)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let write_err = |e: keyring::Error| StorageError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        };
        match self.entry(key).map_err(write_err)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(write_err(e)),
        }
    }
}
