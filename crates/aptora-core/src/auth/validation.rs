//! Client-side checks that run before any request is sent.

use crate::api::ApiError;

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Backend accepts usernames of 3 to 50 characters
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 50;

pub const PASSWORD_MISMATCH: &str = "Passwords do not match";
pub const PASSWORD_TOO_SHORT: &str = "Password must be at least 6 characters long";

/// Check a password chosen at registration or reset. The confirmation is
/// compared first, then the length.
pub fn validate_new_password(password: &str, confirmation: Option<&str>) -> Result<(), ApiError> {
    if let Some(confirmation) = confirmation {
        if confirmation != password {
            return Err(ApiError::Validation(PASSWORD_MISMATCH.to_string()));
        }
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::Validation(PASSWORD_TOO_SHORT.to_string()));
    }
    Ok(())
}

/// Usernames end up as URL path segments in profile lookups.
pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ApiError::Validation(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        || username.starts_with('.')
    {
        return Err(ApiError::Validation(format!("Invalid username: {}", username)));
    }
    Ok(())
}

/// Longest wallet address accepted, in characters
const MAX_WALLET_ADDRESS_LENGTH: usize = 128;

pub const INVALID_WALLET_ADDRESS: &str = "Invalid wallet address";

/// Wallet addresses go into a query string unescaped, so only plain
/// alphanumerics (0x-prefixed hex included) are allowed.
pub fn validate_wallet_address(address: &str) -> Result<(), ApiError> {
    if address.is_empty()
        || address.len() > MAX_WALLET_ADDRESS_LENGTH
        || !address.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ApiError::Validation(INVALID_WALLET_ADDRESS.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_address() {
        assert!(validate_wallet_address("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984").is_ok());
        assert!(validate_wallet_address("").is_err());
        assert!(validate_wallet_address("0xabc&admin=1").is_err());
        assert!(validate_wallet_address(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_short_password_rejected() {
        assert_eq!(
            validate_new_password("abc12", None),
            Err(ApiError::Validation(PASSWORD_TOO_SHORT.to_string()))
        );
        assert_eq!(
            validate_new_password("abc12", Some("abc12")),
            Err(ApiError::Validation(PASSWORD_TOO_SHORT.to_string()))
        );
    }

    #[test]
    fn test_mismatch_rejected() {
        assert_eq!(
            validate_new_password("secret1", Some("secret2")),
            Err(ApiError::Validation(PASSWORD_MISMATCH.to_string()))
        );
    }

    #[test]
    fn test_mismatch_checked_before_length() {
        assert_eq!(
            validate_new_password("abc", Some("abd")),
            Err(ApiError::Validation(PASSWORD_MISMATCH.to_string()))
        );
    }

    #[test]
    fn test_valid_passwords() {
        assert!(validate_new_password("secret", None).is_ok());
        assert!(validate_new_password("secret1", Some("secret1")).is_ok());
        // Length counts characters, not bytes
        assert!(validate_new_password("ééééé", None).is_err());
        assert!(validate_new_password("éééééé", None).is_ok());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("satoshi_42").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("../admin").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("a/b/c").is_err());
    }
}
