use thiserror::Error;

use crate::auth::StorageError;

use super::envelope;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Rejected before or by the server as malformed input (any 4xx but 401).
    #[error("{0}")]
    Validation(String),

    /// Credentials rejected at login or registration.
    #[error("{0}")]
    Authentication(String),

    /// A 401 that could not be recovered by refreshing the access token.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The refresh-token exchange failed.
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// Raw 401 from a bearer request, before refresh-and-retry handling.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    /// Success status, but the envelope reported `success = false` or
    /// carried no data.
    #[error("{0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Token storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success status to an error, preferring the message carried
    /// in the envelope over the raw body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = envelope::error_message(body).unwrap_or_else(|| Self::truncate_body(body));
        match status {
            401 => ApiError::Unauthorized(message),
            429 => ApiError::RateLimited,
            400..=499 => ApiError::Validation(message),
            500..=599 => ApiError::Server(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// The human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            ApiError::Validation(m)
            | ApiError::Authentication(m)
            | ApiError::SessionExpired(m)
            | ApiError::Refresh(m)
            | ApiError::Unauthorized(m)
            | ApiError::Server(m)
            | ApiError::Rejected(m)
            | ApiError::Network(m)
            | ApiError::InvalidResponse(m)
            | ApiError::Storage(m) => m.clone(),
            ApiError::RateLimited => self.to_string(),
        }
    }

    /// Errors a form should render inline rather than escalate.
    pub fn is_form_error(&self) -> bool {
        matches!(self, ApiError::Validation(_) | ApiError::Authentication(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}
