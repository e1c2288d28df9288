//! The session store: login, registration, logout, refresh and start-up
//! restoration, plus the reactive state the UI renders from.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::models::{AuthResponse, ProfileUpdate, Registration, User};

use super::renewal::RenewalTimer;
use super::session::{AuthState, Session, SessionEvent};
use super::storage::TokenPair;
use super::validation::validate_new_password;

const NOT_AUTHENTICATED: &str = "You must be logged in to change your profile";

/// Clone is cheap - all clones share one session and one renewal timer.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    api: ApiClient,
    renewal_interval: Duration,
    renewal: RenewalTimer,
}

impl SessionStore {
    pub fn new(api: ApiClient, renewal_interval: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                api,
                renewal_interval,
                renewal: RenewalTimer::new(),
            }),
        }
    }

    /// Build the full stack (token storage, session, reqwest client) from
    /// configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = config.token_storage().context("Failed to open token storage")?;
        let session = Arc::new(Session::new(storage));
        let api = ApiClient::new(config, session).context("Failed to create API client")?;
        Ok(Self::new(api, config.renewal_interval()))
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn session(&self) -> &Arc<Session> {
        self.inner.api.session()
    }

    pub fn state(&self) -> AuthState {
        self.session().state()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.session().subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session().events()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    pub fn is_renewing(&self) -> bool {
        self.inner.renewal.is_running()
    }

    /// Resolve once initialization has finished.
    pub async fn wait_ready(&self) -> AuthState {
        let mut state = self.subscribe();
        let ready = match state.wait_for(|s| s.is_ready).await {
            Ok(ready) => ready.clone(),
            Err(_) => self.state(),
        };
        ready
    }

    /// Restore a stored session, if any. Fetch the profile with the stored
    /// access token; on failure refresh once and fetch again; if that also
    /// fails, clear everything. Marks the store ready when done.
    pub async fn initialize(&self) -> AuthState {
        let session = self.session();
        if session.has_tokens() {
            let generation = session.generation();
            let user = match self.inner.api.current_user_without_retry().await {
                Ok(user) => Ok(user),
                Err(e) => {
                    info!(error = %e, "Stored access token rejected, refreshing");
                    match self.inner.api.refresh_access_token().await {
                        Ok(_) => self.inner.api.current_user_without_retry().await,
                        Err(e) => Err(e),
                    }
                }
            };

            match user {
                Ok(user) => {
                    if session.set_user(generation, user) {
                        info!("Restored stored session");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Could not restore stored session, clearing it");
                    session.clear(SessionEvent::LoggedOut);
                }
            }
        } else {
            debug!("No stored tokens");
        }

        session.mark_ready();
        if session.is_authenticated() {
            self.start_renewal();
        }
        self.state()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.session().begin_loading();
        let result = self.inner.api.login(email, password).await;
        self.session().end_loading();

        match result {
            Ok(auth) => self.adopt(auth),
            Err(e) => {
                debug!(error = %e, "Login failed");
                Err(e)
            }
        }
    }

    /// Validate the form locally, then register. Local failures never
    /// reach the server.
    pub async fn register(&self, registration: &Registration) -> Result<User, ApiError> {
        validate_new_password(
            &registration.password,
            registration.confirm_password.as_deref(),
        )?;

        self.session().begin_loading();
        let result = self.inner.api.register(registration).await;
        self.session().end_loading();

        match result {
            Ok(auth) => self.adopt(auth),
            Err(e) => {
                debug!(error = %e, "Registration failed");
                Err(e)
            }
        }
    }

    fn adopt(&self, auth: AuthResponse) -> Result<User, ApiError> {
        let user = auth.user.clone();
        self.session().establish(
            auth.user,
            TokenPair {
                access_token: auth.access_token,
                refresh_token: auth.refresh_token,
            },
        )?;
        self.start_renewal();
        Ok(user)
    }

    /// Clear local state unconditionally, then tell the server to drop the
    /// refresh token. Never fails.
    pub async fn logout(&self) {
        self.inner.renewal.stop();
        let Some(refresh_token) = self.session().clear(SessionEvent::LoggedOut) else {
            return;
        };
        if let Err(e) = self.inner.api.logout(&refresh_token).await {
            warn!(error = %e, "Server logout failed");
        }
    }

    /// Swap the access token for a fresh one. The refresh token stays.
    pub async fn refresh_access_token(&self) -> Result<(), ApiError> {
        self.inner.api.refresh_access_token().await.map(|_| ())
    }

    /// `refresh_access_token` for a UI button: report success only.
    pub async fn manual_refresh(&self) -> bool {
        match self.refresh_access_token().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Manual refresh failed");
                false
            }
        }
    }

    /// Replace the user record of the current session, e.g. after a
    /// profile edit.
    pub fn update_user(&self, user: User) -> bool {
        self.session().update_user(user)
    }

    /// Save profile changes and adopt the record the server returns.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        if !self.is_authenticated() {
            return Err(ApiError::Authentication(NOT_AUTHENTICATED.to_string()));
        }
        let generation = self.session().generation();
        let user = self.inner.api.update_profile(update).await?;
        if !self.session().set_user(generation, user.clone()) {
            debug!("Session ended during profile update");
        }
        Ok(user)
    }

    /// Link a wallet to the account: resolve its trading profile address,
    /// then store both addresses on the profile.
    pub async fn set_wallet_address(&self, wallet_address: &str) -> Result<User, ApiError> {
        if !self.is_authenticated() {
            return Err(ApiError::Authentication(NOT_AUTHENTICATED.to_string()));
        }
        let profile_address = self.profile_address(wallet_address).await?;
        info!(%wallet_address, %profile_address, "Linking wallet");
        self.update_profile(&ProfileUpdate {
            wallet_address: Some(wallet_address.to_string()),
            profile_address: Some(profile_address),
            ..ProfileUpdate::default()
        })
        .await
    }

    pub async fn profile_address(&self, wallet_address: &str) -> Result<String, ApiError> {
        self.inner.api.profile_address(wallet_address).await
    }

    fn start_renewal(&self) {
        self.inner
            .renewal
            .start(self.inner.api.clone(), self.inner.renewal_interval);
    }
}
