//! The wire seam under `ApiClient`.
//!
//! `Transport` sends one fully-formed request and reports the raw status and
//! body. Everything above it (credentials, envelopes, refresh-and-retry) is
//! transport-agnostic, so tests swap in a scripted implementation.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client, Method};
use serde_json::Value;
use tracing::debug;

use super::ApiError;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Access token to send as `Authorization: Bearer ...`.
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    /// Send a request. Only failures to get any response are errors here;
    /// HTTP error statuses come back as `Ok`.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>>;
}

/// Production transport over reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        Box::pin(async move {
            debug!(method = %request.method, url = %request.url, "Sending request");

            let mut builder = self
                .client
                .request(request.method, &request.url)
                .header(header::ACCEPT, "application/json");
            if let Some(ref token) = request.bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            debug!(status, "Received response");

            Ok(HttpResponse { status, body })
        })
    }
}
