//! Shared session state: who is logged in and which tokens are current.
//!
//! `Session` is the only writer of token storage. Every mutation writes
//! through to storage while the state lock is held, then publishes a fresh
//! `AuthState` snapshot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::models::User;

use super::storage::{TokenPair, TokenStorage};

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Snapshot published to the UI layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    /// Initialization has finished; authentication status is meaningful.
    pub is_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut,
    /// The session was ended by the server side; the UI should go to login.
    Expired,
}

#[derive(Debug, Default)]
struct SessionData {
    user: Option<User>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    generation: u64,
    pending: u32,
    is_ready: bool,
}

impl SessionData {
    fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    fn is_empty(&self) -> bool {
        self.user.is_none() && self.access_token.is_none() && self.refresh_token.is_none()
    }

    fn snapshot(&self) -> AuthState {
        AuthState {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated(),
            is_loading: !self.is_ready || self.pending > 0,
            is_ready: self.is_ready,
        }
    }
}

pub struct Session {
    storage: TokenStorage,
    data: Mutex<SessionData>,
    state: watch::Sender<AuthState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session seeded with whatever token pair storage holds. The
    /// user record is unknown until initialization fetches it.
    pub fn new(storage: TokenStorage) -> Self {
        let stored = storage.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load stored tokens");
            None
        });
        debug!(has_tokens = stored.is_some(), "Session loaded");

        let mut data = SessionData::default();
        if let Some(tokens) = stored {
            data.access_token = Some(tokens.access_token);
            data.refresh_token = Some(tokens.refresh_token);
        }

        let (state, _) = watch::channel(data.snapshot());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            data: Mutex::new(data),
            state,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, data: &SessionData) {
        self.state.send_replace(data.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.clone()
    }

    pub fn has_tokens(&self) -> bool {
        let data = self.lock();
        data.access_token.is_some() && data.refresh_token.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated()
    }

    /// Bumped whenever a session is started or ended. Work that began under
    /// an older generation must not write state.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Replace the whole session with a freshly issued one.
    pub fn establish(&self, user: User, tokens: TokenPair) -> Result<(), ApiError> {
        let mut data = self.lock();
        self.storage.save(&tokens)?;

        data.generation += 1;
        data.user = Some(user);
        data.access_token = Some(tokens.access_token);
        data.refresh_token = Some(tokens.refresh_token);
        self.publish(&data);
        drop(data);

        info!("Session established");
        self.emit(SessionEvent::LoggedIn);
        Ok(())
    }

    /// Install a refreshed access token, unless the session it was minted
    /// for has ended in the meantime. Returns whether it was applied.
    pub fn apply_refresh(&self, generation: u64, access_token: String) -> Result<bool, ApiError> {
        let mut data = self.lock();
        if data.generation != generation || data.refresh_token.is_none() {
            debug!("Discarding refresh response for an ended session");
            return Ok(false);
        }
        self.storage.save_access_token(&access_token)?;

        data.access_token = Some(access_token);
        self.publish(&data);
        drop(data);

        debug!("Access token refreshed");
        self.emit(SessionEvent::Refreshed);
        Ok(true)
    }

    /// Attach the user record fetched for stored tokens.
    pub fn set_user(&self, generation: u64, user: User) -> bool {
        let mut data = self.lock();
        if data.generation != generation || data.access_token.is_none() {
            return false;
        }
        data.user = Some(user);
        self.publish(&data);
        true
    }

    /// Replace the user record of an authenticated session.
    pub fn update_user(&self, user: User) -> bool {
        let mut data = self.lock();
        if !data.is_authenticated() {
            return false;
        }
        data.user = Some(user);
        self.publish(&data);
        true
    }

    /// Drop user and tokens from memory and storage. Returns the refresh
    /// token that was current, for a best-effort server logout. `event` is
    /// emitted only if there was something to clear.
    pub fn clear(&self, event: SessionEvent) -> Option<String> {
        let data = self.lock();
        self.clear_locked(data, event)
    }

    /// Purge after an unrecoverable 401, but only if `generation` is still
    /// the current session. A request that started under an ended session
    /// must not end its successor.
    pub fn expire_if(&self, generation: u64) -> Option<String> {
        let data = self.lock();
        if data.generation != generation {
            debug!("Ignoring expiry from an ended session");
            return None;
        }
        self.clear_locked(data, SessionEvent::Expired)
    }

    fn clear_locked(&self, mut data: MutexGuard<'_, SessionData>, event: SessionEvent) -> Option<String> {
        let had_session = !data.is_empty();

        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        data.generation += 1;
        data.user = None;
        data.access_token = None;
        let refresh_token = data.refresh_token.take();
        self.publish(&data);
        drop(data);

        if had_session {
            info!(?event, "Session cleared");
            self.emit(event);
        }
        refresh_token
    }

    pub fn begin_loading(&self) {
        let mut data = self.lock();
        data.pending += 1;
        self.publish(&data);
    }

    pub fn end_loading(&self) {
        let mut data = self.lock();
        data.pending = data.pending.saturating_sub(1);
        self.publish(&data);
    }

    pub fn mark_ready(&self) {
        let mut data = self.lock();
        data.is_ready = true;
        self.publish(&data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{MemoryStore, SecretStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::testing::sample_user;

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair { access_token: access.to_string(), refresh_token: refresh.to_string() }
    }

    #[test]
    fn test_new_session_loads_stored_tokens_but_is_not_authenticated() {
        let backend = MemoryStore::new();
        backend.set(ACCESS_TOKEN_KEY, "at-1").unwrap();
        backend.set(REFRESH_TOKEN_KEY, "rt-1").unwrap();
        let session = Session::new(TokenStorage::new(backend));

        assert!(session.has_tokens());
        assert!(!session.is_authenticated());
        let state = session.state();
        assert!(state.is_loading);
        assert!(!state.is_ready);
    }

    #[test]
    fn test_establish_writes_through() {
        let backend = MemoryStore::new();
        let session = Session::new(TokenStorage::new(backend.clone()));
        session.establish(sample_user(), pair("at-1", "rt-1")).unwrap();

        assert!(session.is_authenticated());
        assert_eq!(backend.peek(ACCESS_TOKEN_KEY).as_deref(), Some("at-1"));
        assert_eq!(backend.peek(REFRESH_TOKEN_KEY).as_deref(), Some("rt-1"));
        assert!(session.state().is_authenticated);
    }

    #[test]
    fn test_refresh_from_older_generation_is_discarded() {
        let backend = MemoryStore::new();
        let session = Session::new(TokenStorage::new(backend.clone()));
        session.establish(sample_user(), pair("at-1", "rt-1")).unwrap();
        let generation = session.generation();

        session.clear(SessionEvent::LoggedOut);
        assert!(!session.apply_refresh(generation, "at-2".to_string()).unwrap());
        assert_eq!(session.access_token(), None);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_clear_emits_once() {
        let session = Session::new(TokenStorage::new(MemoryStore::new()));
        session.establish(sample_user(), pair("at-1", "rt-1")).unwrap();
        let mut events = session.events();

        assert_eq!(session.clear(SessionEvent::LoggedOut).as_deref(), Some("rt-1"));
        assert_eq!(session.clear(SessionEvent::LoggedOut), None);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_expire_from_older_generation_keeps_new_session() {
        let backend = MemoryStore::new();
        let session = Session::new(TokenStorage::new(backend.clone()));
        session.establish(sample_user(), pair("at-1", "rt-1")).unwrap();
        let stale = session.generation();
        session.clear(SessionEvent::LoggedOut);
        session.establish(sample_user(), pair("at-new", "rt-new")).unwrap();
        let mut events = session.events();

        assert_eq!(session.expire_if(stale), None);
        assert!(session.is_authenticated());
        assert_eq!(backend.peek(REFRESH_TOKEN_KEY).as_deref(), Some("rt-new"));
        assert!(events.try_recv().is_err());

        let current = session.generation();
        assert_eq!(session.expire_if(current).as_deref(), Some("rt-new"));
        assert!(!session.is_authenticated());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
    }

    #[test]
    fn test_user_without_token_is_not_authenticated() {
        let session = Session::new(TokenStorage::new(MemoryStore::new()));
        let generation = session.generation();
        assert!(!session.set_user(generation, sample_user()));
        assert!(!session.update_user(sample_user()));
        assert!(session.state().user.is_none());
    }

    #[test]
    fn test_loading_tracks_pending_operations() {
        let session = Session::new(TokenStorage::new(MemoryStore::new()));
        session.mark_ready();
        assert!(!session.state().is_loading);

        session.begin_loading();
        assert!(session.state().is_loading);
        session.end_loading();
        assert!(!session.state().is_loading);
    }
}
