//! Aptora core - session management for the Aptora trading client.
//!
//! The pieces, bottom-up:
//!
//! - [`auth::TokenStorage`] persists the access/refresh token pair
//! - [`auth::Session`] holds the current user and tokens and publishes
//!   [`auth::AuthState`] snapshots
//! - [`api::ApiClient`] attaches credentials to every request and recovers
//!   from one expired access token per request
//! - [`auth::SessionStore`] drives login, registration, logout and refresh,
//!   and owns the background renewal timer

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthState, SessionEvent, SessionStore};
pub use config::Config;
