//! The `{success, data, message, error}` wrapper every backend response uses.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::ApiError;

const DEFAULT_FAILURE: &str = "API request failed";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl Envelope {
    fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| DEFAULT_FAILURE.to_string())
    }
}

fn parse(body: &str) -> Result<Envelope, ApiError> {
    serde_json::from_str(body)
        .map_err(|e| ApiError::InvalidResponse(format!("Malformed response envelope: {}", e)))
}

/// Unwrap `data` from a successful envelope.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let envelope = parse(body)?;
    if !envelope.success {
        return Err(ApiError::Rejected(envelope.failure_message()));
    }
    match envelope.data {
        Some(Value::Null) | None => Err(ApiError::Rejected(envelope.failure_message())),
        Some(data) => serde_json::from_value(data)
            .map_err(|e| ApiError::InvalidResponse(format!("Unexpected response data: {}", e))),
    }
}

/// Check an envelope whose payload is irrelevant (logout and friends).
pub fn decode_unit(body: &str) -> Result<(), ApiError> {
    if body.trim().is_empty() {
        return Ok(());
    }
    let envelope = parse(body)?;
    if envelope.success {
        Ok(())
    } else {
        Err(ApiError::Rejected(envelope.failure_message()))
    }
}

/// Server-supplied error text from a failure body, if it is an envelope.
pub fn error_message(body: &str) -> Option<String> {
    let envelope: Envelope = serde_json::from_str(body).ok()?;
    envelope.error.or(envelope.message)
}
