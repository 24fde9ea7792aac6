// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription state machine.
//!
//! The record mutex is held for the whole of a reconciliation or teardown,
//! so at most one of them touches the remote API at a time. Status reads go
//! through a separate snapshot and never wait on an in-flight attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::SubscriptionError;
use crate::remote::reachability::ReachabilityCheck;
use crate::remote::registry::{ClientCredentials, RemoteSubscription, SubscriptionRegistry};
use crate::subscription::{
    callback_url, ErrorInfo, RecordStore, SubscriptionRecord, SubscriptionState,
    SubscriptionStatus, TeardownReport,
};
use crate::token::session::TokenSession;
use crate::token::AuthError;

/// Coordinates token, reachability and registry to keep exactly one remote
/// subscription pointing at the current callback URL.
pub struct SubscriptionManager {
    record: Mutex<SubscriptionRecord>,
    status: RwLock<SubscriptionStatus>,
    registry: SubscriptionRegistry,
    reachability: ReachabilityCheck,
    tokens: Arc<TokenSession>,
    store: RecordStore,
    webhook_path: String,
    /// Bumped for every submitted trigger; a running attempt that sees a
    /// different value stops before its next mutating call.
    generation: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(
        record: SubscriptionRecord,
        store: RecordStore,
        registry: SubscriptionRegistry,
        reachability: ReachabilityCheck,
        tokens: Arc<TokenSession>,
        webhook_path: impl Into<String>,
    ) -> Self {
        let state = if record.webhook_id.is_some() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Unconfigured
        };
        let status = SubscriptionStatus {
            state,
            webhook_id: record.webhook_id.clone(),
            callback_url: record.callback_url.clone(),
            last_error: None,
            updated_at_ms: epoch_ms(),
        };
        Self {
            record: Mutex::new(record),
            status: RwLock::new(status),
            registry,
            reachability,
            tokens,
            store,
            webhook_path: webhook_path.into(),
            generation: AtomicU64::new(0),
        }
    }

    /// Current status snapshot.
    pub async fn status(&self) -> SubscriptionStatus {
        self.status.read().await.clone()
    }

    pub async fn state(&self) -> SubscriptionState {
        self.status.read().await.state
    }

    /// Copy of the record. Waits for any in-flight attempt to finish.
    pub async fn record(&self) -> SubscriptionRecord {
        self.record.lock().await.clone()
    }

    /// Mark any running attempt as superseded by a newer trigger.
    pub fn supersede(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Bring the remote subscription in line with `base_url`.
    ///
    /// Never returns an error: failures are logged, recorded in the status
    /// and left for the next trigger.
    pub async fn reconcile(&self, base_url: &str) -> SubscriptionState {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut record = self.record.lock().await;

        if self.state().await == SubscriptionState::Deleted {
            debug!("subscription torn down, ignoring reconcile");
            return SubscriptionState::Deleted;
        }

        let callback = callback_url(base_url, &self.webhook_path);
        match self.drive(&mut record, &callback, generation).await {
            Ok(()) => {
                self.transition(SubscriptionState::Active, None).await;
                SubscriptionState::Active
            }
            Err(SubscriptionError::Auth(AuthError::NotAuthorized)) => {
                info!("no token set yet, waiting for authorization");
                let err = SubscriptionError::Auth(AuthError::NotAuthorized);
                self.transition(SubscriptionState::Unconfigured, Some(&err)).await;
                SubscriptionState::Unconfigured
            }
            Err(e) => {
                match &e {
                    SubscriptionError::Auth(_) => {
                        error!(err = %e, "reconciliation needs re-authorization")
                    }
                    SubscriptionError::Superseded => {
                        warn!(callback_url = %callback, "reconciliation superseded")
                    }
                    _ => error!(
                        callback_url = %callback,
                        kind = e.kind(),
                        err = %e,
                        "reconciliation failed"
                    ),
                }
                self.transition(SubscriptionState::Failed, Some(&e)).await;
                SubscriptionState::Failed
            }
        }
    }

    async fn drive(
        &self,
        record: &mut SubscriptionRecord,
        callback: &str,
        generation: u64,
    ) -> Result<(), SubscriptionError> {
        let token = self.tokens.get_valid_token().await?;
        let client_id = record.client_id.clone();
        let client_secret = record.client_secret.clone();
        let creds = ClientCredentials { client_id: &client_id, client_secret: &client_secret };

        let known = match record.webhook_id.clone() {
            None => None,
            Some(id) => match self.registry.get_existing(&token, creds).await {
                Ok(remote) => Some(remote),
                Err(SubscriptionError::NotFound) => {
                    warn!(webhook_id = %id, "persisted subscription no longer exists remotely");
                    self.save(record, None, None).await;
                    None
                }
                Err(e) => return Err(e),
            },
        };

        let remote = match known {
            Some(remote) => remote,
            None => {
                self.transition(SubscriptionState::PendingVerification, None).await;
                self.reachability.verify(callback).await?;
                if self.superseded(generation) {
                    return Err(SubscriptionError::Superseded);
                }
                let created =
                    self.registry.create(&token, creds, callback, &record.verify_token).await;
                match created {
                    Ok(id) => {
                        info!(webhook_id = %id, callback_url = %callback, "subscription created");
                        self.save(record, Some(id), Some(callback.to_owned())).await;
                        return Ok(());
                    }
                    Err(SubscriptionError::AlreadyExists) => {
                        info!("subscription already exists, recovering it");
                        self.registry.get_existing(&token, creds).await?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.adopt(record, &remote).await;
        if remote.callback_url == callback {
            debug!(webhook_id = %remote.id, "subscription up to date");
            return Ok(());
        }

        info!(
            webhook_id = %remote.id,
            registered = %remote.callback_url,
            current = %callback,
            "callback URL drifted, replacing subscription"
        );
        self.transition(SubscriptionState::Stale, None).await;

        // Keep the old subscription unless the new URL can actually be verified.
        self.reachability.verify(callback).await?;
        if self.superseded(generation) {
            return Err(SubscriptionError::Superseded);
        }

        self.transition(SubscriptionState::Reconciling, None).await;
        self.registry.delete(&token, &remote.id, creds).await?;
        info!(webhook_id = %remote.id, "stale subscription deleted");
        self.save(record, None, None).await;

        if self.superseded(generation) {
            return Err(SubscriptionError::Superseded);
        }

        let id = self.registry.create(&token, creds, callback, &record.verify_token).await?;
        info!(webhook_id = %id, callback_url = %callback, "subscription recreated");
        self.save(record, Some(id), Some(callback.to_owned())).await;
        Ok(())
    }

    /// Make the record reflect the subscription the remote API reports.
    async fn adopt(&self, record: &mut SubscriptionRecord, remote: &RemoteSubscription) {
        if record.webhook_id.as_deref() == Some(remote.id.as_str())
            && record.callback_url.as_deref() == Some(remote.callback_url.as_str())
        {
            return;
        }
        self.save(record, Some(remote.id.clone()), Some(remote.callback_url.clone())).await;
    }

    /// Delete the remote subscription and destroy the local record.
    ///
    /// Ends in `Deleted` whatever the remote outcome; a failed deletion is
    /// reported so it can be cleaned up by hand.
    pub async fn teardown(&self) -> TeardownReport {
        self.supersede();
        let mut record = self.record.lock().await;
        let mut report =
            TeardownReport { webhook_id: record.webhook_id.clone(), remote_deleted: false, error: None };

        match self.delete_remote(&record).await {
            Ok(Some(id)) => {
                info!(webhook_id = %id, "remote subscription deleted");
                report.webhook_id = Some(id);
                report.remote_deleted = true;
            }
            Ok(None) => debug!("no remote subscription to delete"),
            Err(e) => {
                error!(
                    webhook_id = record.webhook_id.as_deref().unwrap_or("unknown"),
                    err = %e,
                    "failed to delete remote subscription, remove it manually"
                );
                report.error = Some(e.to_string());
            }
        }

        record.webhook_id = None;
        record.callback_url = None;
        if let Err(e) = self.store.remove() {
            warn!(err = %e, "failed to remove subscription record");
        }
        {
            let mut status = self.status.write().await;
            status.webhook_id = None;
            status.callback_url = None;
        }
        let err = report.error.clone().map(SubscriptionError::Remote);
        self.transition(SubscriptionState::Deleted, err.as_ref()).await;
        report
    }

    /// Delete the known subscription, or any orphan the remote API reports.
    async fn delete_remote(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<Option<String>, SubscriptionError> {
        let token = match self.tokens.get_valid_token().await {
            Ok(token) => token,
            Err(AuthError::NotAuthorized) if record.webhook_id.is_none() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id = match record.webhook_id.clone() {
            Some(id) => id,
            None => match self.registry.get_existing(&token, record.credentials()).await {
                Ok(remote) => remote.id,
                Err(SubscriptionError::NotFound) => return Ok(None),
                Err(e) => return Err(e),
            },
        };
        self.registry.delete(&token, &id, record.credentials()).await?;
        Ok(Some(id))
    }

    /// Update and persist the record, mirroring it into the status snapshot.
    async fn save(
        &self,
        record: &mut SubscriptionRecord,
        webhook_id: Option<String>,
        callback_url: Option<String>,
    ) {
        record.webhook_id = webhook_id;
        record.callback_url = callback_url;
        if let Err(e) = self.store.save(record) {
            error!(err = %e, "failed to persist subscription record");
        }
        let mut status = self.status.write().await;
        status.webhook_id = record.webhook_id.clone();
        status.callback_url = record.callback_url.clone();
    }

    async fn transition(&self, state: SubscriptionState, error: Option<&SubscriptionError>) {
        let mut status = self.status.write().await;
        if status.state != state {
            debug!(from = %status.state, to = %state, "subscription state");
        }
        status.state = state;
        status.last_error =
            error.map(|e| ErrorInfo { kind: e.kind().to_owned(), message: e.to_string() });
        status.updated_at_ms = epoch_ms();
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
