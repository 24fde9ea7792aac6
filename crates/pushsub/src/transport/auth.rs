// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::AUTH_CALLBACK_PATH;
use crate::error::ApiError;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header =
        headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(ApiError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Axum middleware that enforces Bearer token authentication on the operator API.
///
/// Exempt: the webhook path (called by the remote API), `/api/v1/health`,
/// and the OAuth callback (reached by browser redirect).
pub async fn auth_layer(
    state: State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    if path == state.config.webhook_path || path == "/api/v1/health" || path == AUTH_CALLBACK_PATH
    {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        return code.to_http_response("unauthorized").into_response();
    }

    next.run(req).await
}
