// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::token::AuthError;

/// Error codes for the operator API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    Unauthorized,
    BadRequest,
    NotConfigured,
    AuthRequired,
    UpstreamError,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::NotConfigured => 409,
            Self::AuthRequired => 403,
            Self::UpstreamError => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Failure modes of a subscription operation.
///
/// `AlreadyExists` and `NotFound` are expected outcomes the manager handles;
/// everything else ends the current reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Token refresh or exchange failed; re-authorization is required.
    Auth(AuthError),
    /// The callback URL does not reach this host.
    Unreachable { url: String, reason: String },
    /// The remote API already holds a subscription for this client.
    AlreadyExists,
    /// The remote API holds no subscription for this client.
    NotFound,
    /// Unexpected remote status, transport failure or timeout.
    Remote(String),
    /// A newer trigger arrived and this attempt stopped early.
    Superseded,
}

impl SubscriptionError {
    /// Short machine-readable kind for status reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Unreachable { .. } => "unreachable",
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::Remote(_) => "remote",
            Self::Superseded => "superseded",
        }
    }
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "authorization failed: {e}"),
            Self::Unreachable { url, reason } => {
                write!(f, "callback {url} is not reachable: {reason}")
            }
            Self::AlreadyExists => f.write_str("subscription already exists"),
            Self::NotFound => f.write_str("no remote subscription"),
            Self::Remote(msg) => write!(f, "remote API error: {msg}"),
            Self::Superseded => f.write_str("superseded by a newer trigger"),
        }
    }
}

impl std::error::Error for SubscriptionError {}

impl From<AuthError> for SubscriptionError {
    fn from(e: AuthError) -> Self {
        match e {
            // An unreachable token endpoint is an ordinary remote failure.
            AuthError::Transport(msg) => Self::Remote(msg),
            other => Self::Auth(other),
        }
    }
}
