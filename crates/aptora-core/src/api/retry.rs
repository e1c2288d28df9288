//! Refresh-once, replay-once recovery from an expired access token.

use std::future::Future;

use tracing::{debug, warn};

use super::ApiError;

/// Run `send` with `token`; on a 401, call `refresh` once and replay `send`
/// once with the token it returns.
///
/// - Any non-401 outcome of the first attempt is returned unchanged.
/// - If `refresh` fails, the result is `SessionExpired` carrying the message
///   of the original 401, not the refresh error.
/// - A replay that is also rejected with 401 becomes `SessionExpired` too;
///   there is never a second refresh.
pub async fn with_refresh_retry<T, S, SFut, R, RFut>(
    token: Option<String>,
    send: S,
    refresh: R,
) -> Result<T, ApiError>
where
    S: Fn(Option<String>) -> SFut,
    SFut: Future<Output = Result<T, ApiError>>,
    R: FnOnce(Option<String>) -> RFut,
    RFut: Future<Output = Result<String, ApiError>>,
{
    let original = match send(token.clone()).await {
        Err(ApiError::Unauthorized(message)) => message,
        other => return other,
    };

    debug!("Request unauthorized, refreshing access token");
    let fresh = match refresh(token).await {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(error = %e, "Refresh after 401 failed");
            return Err(ApiError::SessionExpired(original));
        }
    };

    match send(Some(fresh)).await {
        Err(ApiError::Unauthorized(message)) => Err(ApiError::SessionExpired(message)),
        other => other,
    }
}
