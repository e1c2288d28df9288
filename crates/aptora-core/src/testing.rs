//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::transport::{HttpRequest, HttpResponse, Transport};
use crate::api::{ApiClient, ApiError};
use crate::auth::storage::{MemoryStore, SecretStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::auth::{Session, SessionStore, TokenStorage};
use crate::models::User;

pub const BASE_URL: &str = "http://aptora.test/api";

/// Replays queued responses per path and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<HttpResponse, ApiError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next request to `path`.
    pub fn respond(&self, path: &str, status: u16, body: String) {
        self.push(path, Ok(HttpResponse { status, body }));
    }

    /// Queue a transport-level failure for the next request to `path`.
    pub fn fail(&self, path: &str, error: ApiError) {
        self.push(path, Err(error));
    }

    fn push(&self, path: &str, outcome: Result<HttpResponse, ApiError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Hold the response to the next request to `path` until the returned
    /// gate is notified. The request itself is recorded immediately.
    pub fn hold(&self, path: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(path.to_string(), gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        let url = format!("{}{}", BASE_URL, path);
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        let path = request.url.strip_prefix(BASE_URL).unwrap_or(&request.url).to_string();
        self.requests.lock().unwrap().push(request);
        let outcome = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ApiError::Network(format!("no scripted response for {}", path))));
        let gate = self.gates.lock().unwrap().remove(&path);
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            outcome
        })
    }
}

pub fn ok(data: Value) -> String {
    json!({"success": true, "data": data, "message": null, "error": null}).to_string()
}

pub fn failure(message: &str) -> String {
    json!({"success": false, "data": null, "message": null, "error": message}).to_string()
}

pub fn user_json() -> Value {
    json!({
        "id": "5a7c2f0e-0000-4000-8000-000000000001",
        "email": "ana@example.com",
        "username": "ana",
        "created_at": "2025-01-02T03:04:05Z",
        "updated_at": "2025-01-02T03:04:05Z"
    })
}

pub fn sample_user() -> User {
    serde_json::from_value(user_json()).unwrap()
}

pub fn auth_json(access: &str, refresh: &str) -> Value {
    json!({
        "user": user_json(),
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": 900
    })
}

/// A store over a scripted transport with an optional pre-seeded token pair.
pub fn scripted_store(
    stored: Option<(&str, &str)>,
    renewal: std::time::Duration,
) -> (SessionStore, Arc<ScriptedTransport>, MemoryStore) {
    let backend = MemoryStore::new();
    if let Some((access, refresh)) = stored {
        backend.set(ACCESS_TOKEN_KEY, access).unwrap();
        backend.set(REFRESH_TOKEN_KEY, refresh).unwrap();
    }
    let session = Arc::new(Session::new(TokenStorage::new(backend.clone())));
    let transport = Arc::new(ScriptedTransport::new());
    let api = ApiClient::with_transport(transport.clone(), BASE_URL, session);
    (SessionStore::new(api, renewal), transport, backend)
}
