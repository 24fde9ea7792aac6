// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription lifecycle: the persisted record, the reconciling state
//! machine, and the triggers that drive it.

pub mod manager;
pub mod trigger;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::remote::registry::ClientCredentials;

/// The authoritative, singleton subscription state for this installation.
///
/// `webhook_id` is set if and only if a remote subscription is believed to
/// exist; `callback_url` is the URL that subscription was registered with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    pub verify_token: String,
}

impl SubscriptionRecord {
    pub fn new(client_id: String, client_secret: String, verify_token: String) -> Self {
        Self { client_id, client_secret, callback_url: None, webhook_id: None, verify_token }
    }

    pub fn credentials(&self) -> ClientCredentials<'_> {
        ClientCredentials { client_id: &self.client_id, client_secret: &self.client_secret }
    }
}

impl fmt::Debug for SubscriptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRecord")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("callback_url", &self.callback_url)
            .field("webhook_id", &self.webhook_id)
            .field("verify_token", &self.verify_token)
            .finish()
    }
}

/// Lifecycle state of the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No token set yet; nothing can be registered.
    Unconfigured,
    /// Checking reachability and creating the remote subscription.
    PendingVerification,
    Active,
    /// The registered callback URL no longer matches the current one.
    Stale,
    /// Replacing a stale subscription (delete, then create).
    Reconciling,
    /// The last attempt failed; retried on the next trigger.
    Failed,
    /// Torn down on uninstall. Terminal.
    Deleted,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Reconciling => "reconciling",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details attached to a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Point-in-time view of the subscription for the operator API.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub state: SubscriptionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
    pub updated_at_ms: u64,
}

/// Outcome of tearing the subscription down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Remote subscription that was (or should have been) deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    pub remote_deleted: bool,
    /// Set when remote deletion failed and needs manual cleanup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persistent storage for the [`SubscriptionRecord`].
///
/// One record per installation; `path: None` keeps it in memory only.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: Option<PathBuf>,
}

impl RecordStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn load(&self) -> anyhow::Result<Option<SubscriptionRecord>> {
        match self.path {
            Some(ref path) => crate::persist::load(path),
            None => Ok(None),
        }
    }

    pub fn save(&self, record: &SubscriptionRecord) -> anyhow::Result<()> {
        match self.path {
            Some(ref path) => crate::persist::save(path, record),
            None => Ok(()),
        }
    }

    pub fn remove(&self) -> anyhow::Result<()> {
        match self.path {
            Some(ref path) => crate::persist::remove(path),
            None => Ok(()),
        }
    }

    /// Load the record, or create one from the configured credentials.
    ///
    /// Client credentials are fixed for the lifetime of an installation, so
    /// a stored record for a different `client_id` is an error.
    pub fn load_or_create(
        &self,
        client_id: &str,
        client_secret: &str,
        verify_token: &str,
    ) -> anyhow::Result<SubscriptionRecord> {
        let record = match self.load()? {
            Some(existing) if existing.client_id != client_id => {
                anyhow::bail!(
                    "stored subscription belongs to client {}; uninstall it before switching to {client_id}",
                    existing.client_id
                );
            }
            Some(mut existing) => {
                if existing.client_secret == client_secret && existing.verify_token == verify_token
                {
                    return Ok(existing);
                }
                existing.client_secret = client_secret.to_owned();
                existing.verify_token = verify_token.to_owned();
                existing
            }
            None => SubscriptionRecord::new(
                client_id.to_owned(),
                client_secret.to_owned(),
                verify_token.to_owned(),
            ),
        };
        self.save(&record)?;
        Ok(record)
    }
}

/// Join the external base URL and the webhook path.
pub fn callback_url(base_url: &str, webhook_path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), webhook_path)
}
