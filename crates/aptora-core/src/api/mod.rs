//! REST API client module for the Aptora backend.
//!
//! This module provides the `ApiClient` for communicating with the backend
//! over JSON envelopes. Requests carry a JWT bearer token from the session
//! and transparently survive one access-token expiry.

pub mod client;
pub mod envelope;
pub mod error;
pub mod retry;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use retry::with_refresh_retry;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
