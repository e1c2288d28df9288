//! Data models for the Aptora auth API.
//!
//! - `User`, `PublicProfile`: account records
//! - `ProfileUpdate`, `ProfileAddress`: profile edits and wallet linking
//! - `AuthResponse`, `RefreshResponse`: token-issuing payloads
//! - `Registration`: the sign-up form

pub mod auth;
pub mod user;

pub use auth::{AuthResponse, RefreshResponse, Registration, UsernameAvailability};
pub(crate) use auth::{
    ForgotPasswordRequest, LoginRequest, RefreshTokenRequest, RegisterRequest,
    ResetPasswordRequest,
};
pub use user::{ProfileAddress, ProfileUpdate, PublicProfile, User};
