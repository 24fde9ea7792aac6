// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-process mock of the remote API and
//! config builders.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::Config;

/// Serve `router` on an ephemeral localhost port.
pub async fn serve_ephemeral(router: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

/// Serve a bare endpoint that answers challenges on `webhook_path`.
///
/// Returns the base URL (`http://127.0.0.1:<port>`).
pub async fn serve_callback(webhook_path: &str) -> anyhow::Result<String> {
    let router = Router::new().route(
        webhook_path,
        get(|Query(q): Query<HashMap<String, String>>| async move {
            match q.get("hub.challenge") {
                Some(c) => Json(serde_json::json!({ "hub.challenge": c })).into_response(),
                None => StatusCode::OK.into_response(),
            }
        }),
    );
    let addr = serve_ephemeral(router).await?;
    Ok(format!("http://{addr}"))
}

/// Config pointed at `remote`, with everything else at test-friendly values.
pub fn test_config(remote: &MockRemote, external_url: &str, state_dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: None,
        client_id: "12345".into(),
        client_secret: "client-secret".into(),
        verify_token: "PUSHSUB_VERIFY".into(),
        strict_verify_token: false,
        external_url: Some(external_url.to_owned()),
        external_url_file: None,
        webhook_path: "/api/strava/webhook".into(),
        subscription_url: remote.subscription_url(),
        token_url: remote.token_url(),
        authorize_url: remote.authorize_url(),
        scope: "activity:read".into(),
        state_dir: Some(state_dir.to_path_buf()),
        request_timeout_ms: 5000,
        reachability_timeout_ms: 2000,
        refresh_margin_secs: 300,
        url_check_ms: 50,
        log_level: "debug".into(),
        log_format: "text".into(),
    }
}

/// A subscription held by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSubscription {
    pub id: u64,
    pub callback_url: String,
}

/// Mutable state and knobs of a [`MockRemote`].
pub struct MockRemoteState {
    subscriptions: Mutex<Vec<MockSubscription>>,
    next_id: AtomicU64,
    pub creates: AtomicU64,
    pub lists: AtomicU64,
    pub deletes: AtomicU64,
    pub refreshes: AtomicU64,
    pub code_exchanges: AtomicU64,
    /// Answer creates with a 500.
    pub fail_create: AtomicBool,
    /// Answer deletes with a 500.
    pub fail_delete: AtomicBool,
    /// Answer refresh grants with `invalid_grant`.
    pub reject_refresh: AtomicBool,
    pub delete_delay_ms: AtomicU64,
    pub token_delay_ms: AtomicU64,
    /// Challenge the callback URL before accepting a create, as the real API does.
    pub verify_callbacks: AtomicBool,
    /// Highest number of simultaneously live subscriptions seen.
    pub max_live: AtomicUsize,
    /// Signalled when a delete request arrives, before any delay.
    pub delete_started: Notify,
    last_bearer: Mutex<Option<String>>,
    http: reqwest::Client,
}

/// In-process stand-in for the push-subscription and OAuth token endpoints.
pub struct MockRemote {
    pub addr: SocketAddr,
    pub state: Arc<MockRemoteState>,
}

impl MockRemote {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockRemoteState {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(42),
            creates: AtomicU64::new(0),
            lists: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            code_exchanges: AtomicU64::new(0),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            reject_refresh: AtomicBool::new(false),
            delete_delay_ms: AtomicU64::new(0),
            token_delay_ms: AtomicU64::new(0),
            verify_callbacks: AtomicBool::new(false),
            max_live: AtomicUsize::new(0),
            delete_started: Notify::new(),
            last_bearer: Mutex::new(None),
            http: crate::remote::http_client(Duration::from_secs(2))?,
        });
        let router = Router::new()
            .route("/oauth/token", post(token))
            .route("/api/v3/push_subscriptions", post(create).get(list))
            .route("/api/v3/push_subscriptions/{id}", delete(remove))
            .with_state(Arc::clone(&state));
        let addr = serve_ephemeral(router).await?;
        Ok(Self { addr, state })
    }

    pub fn subscription_url(&self) -> String {
        format!("http://{}/api/v3/push_subscriptions", self.addr)
    }

    pub fn token_url(&self) -> String {
        format!("http://{}/oauth/token", self.addr)
    }

    pub fn authorize_url(&self) -> String {
        format!("http://{}/oauth/authorize", self.addr)
    }

    /// Register a subscription directly, bypassing verification.
    pub fn insert(&self, callback_url: &str) -> u64 {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.state.subscriptions();
        subs.push(MockSubscription { id, callback_url: callback_url.to_owned() });
        self.state.max_live.fetch_max(subs.len(), Ordering::SeqCst);
        id
    }

    pub fn subscriptions(&self) -> Vec<MockSubscription> {
        self.state.subscriptions().clone()
    }

    pub fn creates(&self) -> u64 {
        self.state.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u64 {
        self.state.deletes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> u64 {
        self.state.lists.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u64 {
        self.state.refreshes.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    /// Bearer token presented on the most recent subscription call.
    pub fn last_bearer(&self) -> Option<String> {
        self.state.last_bearer.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MockRemoteState {
    fn subscriptions(&self) -> MutexGuard<'_, Vec<MockSubscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_bearer(&self, headers: &axum::http::HeaderMap) {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);
        *self.last_bearer.lock().unwrap_or_else(|e| e.into_inner()) = bearer;
    }
}

fn fault(status: StatusCode, code: &str) -> Response {
    let body = serde_json::json!({
        "message": "Bad Request",
        "errors": [{ "resource": "PushSubscription", "field": "", "code": code }],
    });
    (status, Json(body)).into_response()
}

async fn token(
    State(s): State<Arc<MockRemoteState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let delay = s.token_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let invalid_grant = || {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid_grant", "error_description": "revoked" })),
        )
            .into_response()
    };

    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => {
            if s.reject_refresh.load(Ordering::SeqCst) {
                return invalid_grant();
            }
            let n = s.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": format!("access-{n}"),
                "refresh_token": format!("refresh-{n}"),
                "expires_in": 21600,
            }))
            .into_response()
        }
        Some("authorization_code") => {
            if form.get("code").map(String::as_str) != Some("good-code") {
                return invalid_grant();
            }
            s.code_exchanges.fetch_add(1, Ordering::SeqCst);
            Json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "access-code",
                "refresh_token": "refresh-code",
                "expires_in": 21600,
            }))
            .into_response()
        }
        _ => invalid_grant(),
    }
}

async fn create(
    State(s): State<Arc<MockRemoteState>>,
    headers: axum::http::HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    s.record_bearer(&headers);
    s.creates.fetch_add(1, Ordering::SeqCst);
    if s.fail_create.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    let Some(callback_url) = form.get("callback_url").cloned() else {
        return fault(StatusCode::BAD_REQUEST, "missing");
    };
    let exists = !s.subscriptions().is_empty();
    if exists {
        return fault(StatusCode::BAD_REQUEST, "already exists");
    }

    if s.verify_callbacks.load(Ordering::SeqCst) {
        let verify_token = form.get("verify_token").cloned().unwrap_or_default();
        if !challenge(&s.http, &callback_url, &verify_token).await {
            return fault(StatusCode::BAD_REQUEST, "GET to callback URL does not return 200");
        }
    }

    let mut subs = s.subscriptions();
    if !subs.is_empty() {
        return fault(StatusCode::BAD_REQUEST, "already exists");
    }
    let id = s.next_id.fetch_add(1, Ordering::SeqCst);
    subs.push(MockSubscription { id, callback_url });
    s.max_live.fetch_max(subs.len(), Ordering::SeqCst);
    (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response()
}

/// Issue a verification challenge and check the echo.
async fn challenge(http: &reqwest::Client, callback_url: &str, verify_token: &str) -> bool {
    let sent = uuid::Uuid::new_v4().to_string();
    let resp = http
        .get(callback_url)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.challenge", sent.as_str()),
            ("hub.verify_token", verify_token),
        ])
        .send()
        .await;
    let Ok(resp) = resp else {
        return false;
    };
    if !resp.status().is_success() {
        return false;
    }
    match resp.json::<serde_json::Value>().await {
        Ok(body) => body.get("hub.challenge").and_then(|v| v.as_str()) == Some(sent.as_str()),
        Err(_) => false,
    }
}

async fn list(
    State(s): State<Arc<MockRemoteState>>,
    headers: axum::http::HeaderMap,
) -> Json<Vec<serde_json::Value>> {
    s.record_bearer(&headers);
    s.lists.fetch_add(1, Ordering::SeqCst);
    let listed = s
        .subscriptions()
        .iter()
        .map(|sub| {
            serde_json::json!({
                "id": sub.id,
                "resource_state": 2,
                "application_id": 12345,
                "callback_url": sub.callback_url,
            })
        })
        .collect();
    Json(listed)
}

async fn remove(
    State(s): State<Arc<MockRemoteState>>,
    headers: axum::http::HeaderMap,
    UrlPath(id): UrlPath<u64>,
) -> StatusCode {
    s.record_bearer(&headers);
    s.deletes.fetch_add(1, Ordering::SeqCst);
    s.delete_started.notify_one();
    let delay = s.delete_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if s.fail_delete.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let mut subs = s.subscriptions();
    let before = subs.len();
    subs.retain(|sub| sub.id != id);
    if subs.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}
