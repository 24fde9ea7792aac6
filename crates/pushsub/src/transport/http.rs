// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator API handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::AUTH_CALLBACK_PATH;
use crate::error::ApiError;
use crate::state::AppState;
use crate::subscription::trigger::Trigger;
use crate::subscription::SubscriptionState;
use crate::token::{epoch_secs, AuthError, TokenSet};

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub subscription: SubscriptionState,
    pub authorized: bool,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub queued: bool,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the provider when the user declines.
    #[serde(default)]
    pub error: Option<String>,
}

/// Request body for `POST /api/v1/auth/seed`.
#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`: reports `stopping` once shutdown has begun.
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if s.shutdown.is_cancelled() { "stopping" } else { "running" };
    Json(HealthResponse {
        status: status.to_owned(),
        subscription: s.manager.state().await,
        authorized: s.tokens.is_authorized().await,
    })
}

/// `GET /api/v1/subscription`
pub async fn subscription_status(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.manager.status().await)
}

/// `POST /api/v1/subscription/reconcile`: queue a manual reconciliation.
pub async fn reconcile(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    if s.manager.state().await == SubscriptionState::Deleted {
        return ApiError::NotConfigured
            .to_http_response("subscription was uninstalled")
            .into_response();
    }
    if !s.reconciler.trigger(Trigger::Manual) {
        return ApiError::Internal.to_http_response("reconciler stopped").into_response();
    }
    (StatusCode::ACCEPTED, Json(ReconcileResponse { queued: true })).into_response()
}

/// `DELETE /api/v1/subscription`: tear the subscription down and forget tokens.
pub async fn uninstall(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let report = s.manager.teardown().await;
    s.tokens.clear().await;
    Json(report)
}

/// `GET /api/v1/auth/authorize`: start an authorization-code flow.
pub async fn authorize(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let base = match s.url_source.resolve().await {
        Ok(base) => base,
        Err(e) => {
            return ApiError::NotConfigured
                .to_http_response(format!("external URL unavailable: {e}"))
                .into_response();
        }
    };
    let redirect_uri = format!("{base}{AUTH_CALLBACK_PATH}");
    match s.tokens.begin_authorization(&redirect_uri).await {
        Ok(req) => Json(req).into_response(),
        Err(e) => ApiError::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /auth/external/callback`: OAuth redirect target.
pub async fn auth_callback(
    State(s): State<Arc<AppState>>,
    Query(q): Query<CallbackQuery>,
) -> impl IntoResponse {
    if let Some(err) = q.error {
        tracing::warn!(err = %err, "authorization declined");
        return ApiError::AuthRequired
            .to_http_response(format!("authorization declined: {err}"))
            .into_response();
    }
    let (Some(code), Some(state)) = (q.code, q.state) else {
        return ApiError::BadRequest.to_http_response("missing code or state").into_response();
    };

    match s.tokens.complete_authorization(&state, &code).await {
        Ok(()) => {
            tracing::info!("authorization completed");
            s.reconciler.trigger(Trigger::Authorized);
            Json(serde_json::json!({ "authorized": true })).into_response()
        }
        Err(e @ AuthError::Transport(_)) => {
            ApiError::UpstreamError.to_http_response(e.to_string()).into_response()
        }
        Err(e) => ApiError::AuthRequired.to_http_response(e.to_string()).into_response(),
    }
}

/// `POST /api/v1/auth/seed`: install a token set obtained out of band.
pub async fn seed(
    State(s): State<Arc<AppState>>,
    Json(req): Json<SeedRequest>,
) -> impl IntoResponse {
    if req.access_token.is_empty() || req.refresh_token.is_empty() {
        return ApiError::BadRequest.to_http_response("empty token").into_response();
    }
    let now = epoch_secs();
    // Without an expiry, treat the access token as already due for refresh.
    let expires_at = req.expires_at.or(req.expires_in.map(|secs| now + secs)).unwrap_or(now);
    s.tokens
        .seed(TokenSet {
            access_token: req.access_token,
            refresh_token: req.refresh_token,
            expires_at,
        })
        .await;
    s.reconciler.trigger(Trigger::Authorized);
    Json(serde_json::json!({ "seeded": true })).into_response()
}
