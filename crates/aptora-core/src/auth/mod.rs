//! Authentication: the session store and everything it owns.
//!
//! This module provides:
//! - `SessionStore`: login, registration, logout, refresh, start-up restore
//! - `Session`: shared user/token state with reactive `AuthState` snapshots
//! - `RenewalTimer`: proactive access-token refresh while authenticated
//! - `TokenStorage`: durable token pair over a `SecretStore` backend
//!   (`KeyringStore`, `FileStore`, `MemoryStore`)

pub mod credentials;
pub mod renewal;
pub mod session;
pub mod storage;
pub mod store;
pub mod validation;

pub use credentials::KeyringStore;
pub use renewal::{RenewalTimer, DEFAULT_RENEWAL_INTERVAL};
pub use session::{AuthState, Session, SessionEvent};
pub use storage::{FileStore, MemoryStore, SecretStore, StorageError, TokenPair, TokenStorage};
pub use store::SessionStore;
