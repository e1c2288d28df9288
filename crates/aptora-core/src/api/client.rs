//! API client for the Aptora backend.
//!
//! `ApiClient` is the single outbound request pipeline. Bearer requests carry
//! the session's current access token and recover from one expired token by
//! refreshing and replaying (see `retry::with_refresh_retry`).

use std::sync::Arc;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::auth::validation::{validate_new_password, validate_username, validate_wallet_address};
use crate::auth::Session;
use crate::config::Config;
use crate::models::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, ProfileAddress, ProfileUpdate,
    PublicProfile, RefreshResponse, RefreshTokenRequest, RegisterRequest, Registration,
    ResetPasswordRequest, User, UsernameAvailability,
};

use super::envelope;
use super::retry::with_refresh_retry;
use super::transport::{HttpRequest, ReqwestTransport, Transport};
use super::ApiError;

const REFRESH_PATH: &str = "/auth/refresh";

/// API client for Aptora.
/// Clone is cheap - transport, session and refresh lock are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: Arc<str>,
    session: Arc<Session>,
    // Serializes refresh exchanges between the 401 path and the renewal timer.
    refresh_lock: Arc<AsyncMutex<()>>,
}

impl ApiClient {
    /// Create a client over reqwest using the configured base URL and timeout
    pub fn new(config: &Config, session: Arc<Session>) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(Arc::new(transport), &config.api_base_url, session))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, base_url: &str, session: Arc<Session>) -> Self {
        Self {
            transport,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            session,
            refresh_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
        serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))
    }

    /// Send one request and return the body of a 2xx response.
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        bearer: Option<String>,
        body: Option<Value>,
    ) -> Result<String, ApiError> {
        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            bearer,
            body,
        };
        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            debug!(path, status = response.status, "Request failed");
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    /// Unauthenticated request where a 401 means "credentials rejected".
    async fn public(&self, method: Method, path: &str, body: Option<Value>) -> Result<String, ApiError> {
        self.dispatch(method, path, None, body)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized(message) => ApiError::Authentication(message),
                other => other,
            })
    }

    /// Bearer request with one-shot refresh-and-replay on 401. An
    /// unrecoverable 401 purges the session.
    async fn authorized(&self, method: Method, path: &str, body: Option<Value>) -> Result<String, ApiError> {
        let generation = self.session.generation();
        let result = with_refresh_retry(
            self.session.access_token(),
            |bearer| self.dispatch(method.clone(), path, bearer, body.clone()),
            |stale| self.renew_after_unauthorized(generation, stale),
        )
        .await;

        if let Err(ApiError::SessionExpired(ref message)) = result {
            warn!(path, message = %message, "Session expired");
            self.session.expire_if(generation);
        }
        result
    }

    /// Bearer GET decoded from the response envelope.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.authorized(Method::GET, path, None).await?;
        envelope::decode(&body)
    }

    /// Bearer POST decoded from the response envelope.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = self.authorized(Method::POST, path, Some(Self::to_body(body)?)).await?;
        envelope::decode(&body)
    }

    /// Bearer PUT decoded from the response envelope.
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = self.authorized(Method::PUT, path, Some(Self::to_body(body)?)).await?;
        envelope::decode(&body)
    }

    // ===== Token Refresh =====

    /// Exchange the refresh token for a new access token and install it.
    /// Returns the new access token.
    pub async fn refresh_access_token(&self) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        self.exchange_refresh_token().await
    }

    /// Scheduled refresh. Skips the exchange when another task rotated the
    /// access token while this one waited for the lock.
    pub async fn renew_access_token(&self) -> Result<String, ApiError> {
        let generation = self.session.generation();
        let current = self.session.access_token();
        self.renew_after_unauthorized(generation, current).await
    }

    /// Refresh on behalf of a request rejected with `stale`. If another task
    /// rotated the token while this one waited, reuse that token instead.
    /// Fails if the session of `generation` ended in the meantime.
    async fn renew_after_unauthorized(&self, generation: u64, stale: Option<String>) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        if self.session.generation() != generation {
            return Err(ApiError::Refresh("Session ended during refresh".to_string()));
        }
        if let Some(current) = self.session.access_token() {
            if stale.as_deref() != Some(current.as_str()) {
                debug!("Access token already rotated, replaying with current token");
                return Ok(current);
            }
        }
        self.exchange_refresh_token().await
    }

    // Caller holds `refresh_lock`.
    async fn exchange_refresh_token(&self) -> Result<String, ApiError> {
        let generation = self.session.generation();
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or_else(|| ApiError::Refresh("No refresh token available".to_string()))?;

        let body = Self::to_body(&RefreshTokenRequest { refresh_token: &refresh_token })?;
        let response = match self.dispatch(Method::POST, REFRESH_PATH, None, Some(body)).await {
            Ok(body) => envelope::decode::<RefreshResponse>(&body),
            Err(e) => Err(e),
        };

        let response = match response {
            Ok(response) => response,
            Err(ApiError::Unauthorized(message)) => {
                warn!("Refresh token rejected, ending session");
                self.session.expire_if(generation);
                return Err(ApiError::Refresh(message));
            }
            Err(ApiError::Validation(message)) | Err(ApiError::Rejected(message)) => {
                return Err(ApiError::Refresh(message));
            }
            Err(e) => return Err(e),
        };

        if !self.session.apply_refresh(generation, response.access_token.clone())? {
            return Err(ApiError::Refresh("Session ended during refresh".to_string()));
        }
        Ok(response.access_token)
    }

    // ===== Auth Endpoints =====

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = Self::to_body(&LoginRequest { email, password })?;
        let body = self.public(Method::POST, "/auth/login", Some(body)).await?;
        envelope::decode(&body).map_err(credentials_rejected)
    }

    /// Submit a registration. Callers validate the form first; see
    /// `SessionStore::register`.
    pub async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        let body = Self::to_body(&RegisterRequest {
            email: &registration.email,
            username: &registration.username,
            password: &registration.password,
            referral_code: registration
                .referral_code
                .as_deref()
                .filter(|code| !code.trim().is_empty()),
        })?;
        let body = self.public(Method::POST, "/auth/register", Some(body)).await?;
        envelope::decode(&body).map_err(credentials_rejected)
    }

    /// Invalidate a refresh token server-side.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let body = Self::to_body(&RefreshTokenRequest { refresh_token })?;
        let body = self.dispatch(Method::POST, "/auth/logout", None, Some(body)).await?;
        envelope::decode_unit(&body)
    }

    /// The logged-in user.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    /// The logged-in user, using the stored access token as-is with no
    /// refresh on 401. Used while initializing, which drives its own single
    /// refresh.
    pub async fn current_user_without_retry(&self) -> Result<User, ApiError> {
        let body = self
            .dispatch(Method::GET, "/auth/me", self.session.access_token(), None)
            .await?;
        envelope::decode(&body)
    }

    /// Another user's public profile.
    pub async fn user_profile_by_username(&self, username: &str) -> Result<PublicProfile, ApiError> {
        validate_username(username)?;
        self.get(&format!("/social/profile/{}", username)).await
    }

    pub async fn check_username(&self, username: &str) -> Result<bool, ApiError> {
        validate_username(username)?;
        let path = format!("/auth/check-username/{}", username);
        let body = self.public(Method::GET, &path, None).await?;
        let availability: UsernameAvailability = envelope::decode(&body)?;
        Ok(availability.available)
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let body = Self::to_body(&ForgotPasswordRequest { email })?;
        let body = self.public(Method::POST, "/auth/forgot-password", Some(body)).await?;
        envelope::decode_unit(&body)
    }

    /// Set a new password with a reset token from the emailed link.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirmation: Option<&str>,
    ) -> Result<(), ApiError> {
        validate_new_password(new_password, confirmation)?;
        let body = Self::to_body(&ResetPasswordRequest { token, new_password })?;
        let body = self.public(Method::POST, "/auth/reset-password", Some(body)).await?;
        envelope::decode_unit(&body)
    }

    // ===== Profile Endpoints =====

    /// Update the logged-in user's profile. Returns the stored record.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        if let Some(ref username) = update.username {
            validate_username(username)?;
        }
        self.put("/user/profile", update).await
    }

    /// Trading profile address derived from a wallet address.
    pub async fn profile_address(&self, wallet_address: &str) -> Result<String, ApiError> {
        validate_wallet_address(wallet_address)?;
        let path = format!("/wallet/profile-address?userAddress={}", wallet_address);
        let response: ProfileAddress = self.get(&path).await?;
        Ok(response.profile_address)
    }
}

/// A 2xx envelope with `success = false` on login or sign-up means the
/// credentials were refused.
fn credentials_rejected(error: ApiError) -> ApiError {
    match error {
        ApiError::Rejected(message) => ApiError::Authentication(message),
        other => other,
    }
}
