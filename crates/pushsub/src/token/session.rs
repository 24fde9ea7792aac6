// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::token::exchange::{self, OAuthClient};
use crate::token::{epoch_secs, AuthError, TokenSet};

/// How long an issued authorization `state` stays redeemable.
const PENDING_TTL: Duration = Duration::from_secs(600);

/// Upper bound on outstanding authorization requests; the oldest is evicted.
const MAX_PENDING: usize = 32;

/// Authorization request handed to the operator's browser.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub state: String,
}

struct PendingAuthorization {
    redirect_uri: String,
    issued_at: Instant,
}

impl PendingAuthorization {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) >= PENDING_TTL
    }
}

/// Guarantees a non-expired bearer token to callers.
///
/// The token set sits behind an async mutex that is held across the refresh
/// exchange, so concurrent callers during a refresh wait for that refresh
/// instead of issuing their own (refresh tokens rotate on use).
pub struct TokenSession {
    tokens: Mutex<Option<TokenSet>>,
    /// Pending authorization-code flows keyed by `state`.
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    oauth: OAuthClient,
    http: reqwest::Client,
    margin_secs: u64,
    persist_path: Option<PathBuf>,
    refreshes: AtomicU64,
}

impl TokenSession {
    pub fn new(
        oauth: OAuthClient,
        timeout: Duration,
        margin: Duration,
        persist_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            tokens: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            oauth,
            http: crate::remote::http_client(timeout)?,
            margin_secs: margin.as_secs(),
            persist_path,
            refreshes: AtomicU64::new(0),
        })
    }

    /// Load a previously persisted token set, if any.
    pub async fn load_persisted(&self) -> anyhow::Result<bool> {
        let Some(ref path) = self.persist_path else {
            return Ok(false);
        };
        let loaded: Option<TokenSet> = crate::persist::load(path)?;
        let found = loaded.is_some();
        *self.tokens.lock().await = loaded;
        Ok(found)
    }

    /// Return an access token valid for at least the refresh margin.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let mut guard = self.tokens.lock().await;
        let current = guard.as_ref().ok_or(AuthError::NotAuthorized)?;

        if !current.expires_within(epoch_secs(), self.margin_secs) {
            return Ok(current.access_token.clone());
        }

        debug!(expires_at = current.expires_at, "access token near expiry, refreshing");
        let response = match exchange::refresh(&self.http, &self.oauth, &current.refresh_token).await
        {
            Ok(r) => r,
            Err(e) => {
                if matches!(e, AuthError::Rejected(_)) {
                    error!(err = %e, "token refresh rejected, re-authorization required");
                } else {
                    warn!(err = %e, "token refresh failed");
                }
                return Err(e);
            }
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        let previous = current.refresh_token.clone();
        let Some(fresh) = response.into_token_set(epoch_secs(), Some(&previous)) else {
            return Err(AuthError::Rejected("token response without refresh token".into()));
        };
        let token = fresh.access_token.clone();
        self.persist(&fresh);
        *guard = Some(fresh);
        info!("access token refreshed");
        Ok(token)
    }

    /// Install a token set (from the authorization callback or an operator).
    /// Holds the token lock across the write, ordering it after any refresh.
    pub async fn seed(&self, tokens: TokenSet) {
        let mut guard = self.tokens.lock().await;
        self.persist(&tokens);
        *guard = Some(tokens);
        info!("token set seeded");
    }

    /// Forget the token set and any pending authorizations.
    pub async fn clear(&self) {
        let mut guard = self.tokens.lock().await;
        if let Some(ref path) = self.persist_path {
            if let Err(e) = crate::persist::remove(path) {
                warn!(err = %e, "failed to remove persisted tokens");
            }
        }
        *guard = None;
        drop(guard);
        self.pending.lock().await.clear();
    }

    /// Whether a token set is present (it may still need a refresh).
    pub async fn is_authorized(&self) -> bool {
        self.tokens.lock().await.is_some()
    }

    /// Number of refresh exchanges performed since start.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Start an authorization-code flow.
    pub async fn begin_authorization(
        &self,
        redirect_uri: &str,
    ) -> anyhow::Result<AuthorizationRequest> {
        let state = uuid::Uuid::new_v4().to_string();
        let auth_url = exchange::authorize_url(&self.oauth, redirect_uri, &state)?;

        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| !p.expired(now));
        while pending.len() >= MAX_PENDING {
            let Some(oldest) =
                pending.iter().min_by_key(|(_, p)| p.issued_at).map(|(k, _)| k.clone())
            else {
                break;
            };
            debug!("evicting oldest pending authorization");
            pending.remove(&oldest);
        }
        pending.insert(
            state.clone(),
            PendingAuthorization { redirect_uri: redirect_uri.to_owned(), issued_at: now },
        );
        Ok(AuthorizationRequest { auth_url, state })
    }

    /// Complete an authorization-code flow. Each `state` is single-use.
    pub async fn complete_authorization(&self, state: &str, code: &str) -> Result<(), AuthError> {
        let redirect_uri = self
            .pending
            .lock()
            .await
            .remove(state)
            .filter(|p| !p.expired(Instant::now()))
            .map(|p| p.redirect_uri)
            .ok_or_else(|| AuthError::Rejected("unknown or expired authorization state".into()))?;

        let response = exchange::exchange_code(&self.http, &self.oauth, code, &redirect_uri).await?;
        let tokens = response
            .into_token_set(epoch_secs(), None)
            .ok_or_else(|| AuthError::Rejected("token response without refresh token".into()))?;
        self.seed(tokens).await;
        Ok(())
    }

    fn persist(&self, tokens: &TokenSet) {
        if let Some(ref path) = self.persist_path {
            if let Err(e) = crate::persist::save(path, tokens) {
                warn!(err = %e, "failed to persist tokens");
            }
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
