// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless client for the remote push-subscription API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::SubscriptionError;

/// Client credentials sent with every registry call.
#[derive(Debug, Clone, Copy)]
pub struct ClientCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// A subscription as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub id: String,
    pub callback_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedBody {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ListedBody {
    id: serde_json::Value,
    #[serde(default)]
    callback_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct FaultBody {
    #[serde(default)]
    errors: Vec<FaultItem>,
}

#[derive(Debug, Deserialize)]
struct FaultItem {
    #[serde(default)]
    code: String,
}

/// Protocol client over the create/list/delete subscription endpoints.
pub struct SubscriptionRegistry {
    url: String,
    http: reqwest::Client,
}

impl SubscriptionRegistry {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            url: url.into().trim_end_matches('/').to_owned(),
            http: crate::remote::http_client(timeout)?,
        })
    }

    /// Register a subscription for `callback_url` and return its id.
    ///
    /// A fault whose code mentions "exists" maps to
    /// [`SubscriptionError::AlreadyExists`].
    pub async fn create(
        &self,
        token: &str,
        creds: ClientCredentials<'_>,
        callback_url: &str,
        verify_token: &str,
    ) -> Result<String, SubscriptionError> {
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(token)
            .form(&[
                ("client_id", creds.client_id),
                ("client_secret", creds.client_secret),
                ("callback_url", callback_url),
                ("verify_token", verify_token),
            ])
            .send()
            .await
            .map_err(|e| transport("create", e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport("create", e))?;

        if status.is_success() {
            let created: CreatedBody = serde_json::from_str(&body)
                .map_err(|e| SubscriptionError::Remote(format!("create: bad response: {e}")))?;
            return id_string(&created.id).ok_or_else(|| {
                SubscriptionError::Remote(format!("create: unusable id {}", created.id))
            });
        }

        if status.is_client_error() {
            let fault: FaultBody = serde_json::from_str(&body).unwrap_or_default();
            if fault.errors.iter().any(|e| e.code.contains("exists")) {
                return Err(SubscriptionError::AlreadyExists);
            }
        }
        Err(unexpected("create", status, &body))
    }

    /// Fetch the subscription currently registered for this client.
    pub async fn get_existing(
        &self,
        token: &str,
        creds: ClientCredentials<'_>,
    ) -> Result<RemoteSubscription, SubscriptionError> {
        let resp = self
            .http
            .get(&self.url)
            .bearer_auth(token)
            .query(&[("client_id", creds.client_id), ("client_secret", creds.client_secret)])
            .send()
            .await
            .map_err(|e| transport("list", e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport("list", e))?;
        if !status.is_success() {
            return Err(unexpected("list", status, &body));
        }

        let listed: Vec<ListedBody> = serde_json::from_str(&body)
            .map_err(|e| SubscriptionError::Remote(format!("list: bad response: {e}")))?;
        listed
            .into_iter()
            .find_map(|s| {
                id_string(&s.id).map(|id| RemoteSubscription { id, callback_url: s.callback_url })
            })
            .ok_or(SubscriptionError::NotFound)
    }

    /// Delete subscription `webhook_id`. Only `204 No Content` is success.
    pub async fn delete(
        &self,
        token: &str,
        webhook_id: &str,
        creds: ClientCredentials<'_>,
    ) -> Result<(), SubscriptionError> {
        let resp = self
            .http
            .delete(format!("{}/{}", self.url, webhook_id))
            .bearer_auth(token)
            .form(&[("client_id", creds.client_id), ("client_secret", creds.client_secret)])
            .send()
            .await
            .map_err(|e| transport("delete", e))?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(unexpected("delete", status, &body))
    }
}

/// Remote ids arrive as JSON numbers or strings.
fn id_string(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn transport(op: &str, e: reqwest::Error) -> SubscriptionError {
    if e.is_timeout() {
        SubscriptionError::Remote(format!("{op}: timed out"))
    } else {
        SubscriptionError::Remote(format!("{op}: {e}"))
    }
}

fn unexpected(op: &str, status: StatusCode, body: &str) -> SubscriptionError {
    let mut snippet: String = body.chars().take(200).collect();
    if snippet.len() < body.len() {
        snippet.push('…');
    }
    SubscriptionError::Remote(format!("{op} returned {status}: {snippet}"))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
