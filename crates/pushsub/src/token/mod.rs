// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth2 token session: holds the token set and hands out valid bearer tokens.
//!
//! The [`TokenSet`] never leaves this module; callers only ever see the
//! access token string returned by [`session::TokenSession::get_valid_token`].

pub mod exchange;
pub mod session;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Access/refresh token pair with absolute expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as epoch seconds.
    pub expires_at: u64,
}

impl TokenSet {
    /// Whether the access token expires within `margin_secs` of `now`.
    pub fn expires_within(&self, now: u64, margin_secs: u64) -> bool {
        self.expires_at <= now.saturating_add(margin_secs)
    }
}

// Tokens are secrets; keep them out of debug logs.
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Standard OAuth2 token response.
///
/// Strava also returns an absolute `expires_at`; either field is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl TokenResponse {
    /// Absolute expiry in epoch seconds, preferring `expires_in`.
    pub fn expiry(&self, now: u64) -> u64 {
        match (self.expires_in, self.expires_at) {
            (Some(secs), _) => now.saturating_add(secs),
            (None, Some(at)) => at,
            (None, None) => now,
        }
    }

    /// Convert into a [`TokenSet`], keeping `previous_refresh` when the
    /// response does not rotate the refresh token.
    pub fn into_token_set(self, now: u64, previous_refresh: Option<&str>) -> Option<TokenSet> {
        let expires_at = self.expiry(now);
        let refresh_token = self.refresh_token.or_else(|| previous_refresh.map(str::to_owned))?;
        Some(TokenSet { access_token: self.access_token, refresh_token, expires_at })
    }
}

/// OAuth2 error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Failure to produce a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token set has been issued yet; the operator must authorize.
    NotAuthorized,
    /// The token endpoint rejected the grant (e.g. `invalid_grant`).
    /// Re-authorization is required.
    Rejected(String),
    /// The token endpoint could not be reached or timed out.
    Transport(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthorized => f.write_str("not authorized"),
            Self::Rejected(msg) => write!(f, "token grant rejected: {msg}"),
            Self::Transport(msg) => write!(f, "token endpoint unavailable: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
