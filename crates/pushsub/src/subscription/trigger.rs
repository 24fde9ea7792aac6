// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation triggers and the single task that acts on them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::subscription::manager::SubscriptionManager;

/// Events that warrant a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Process start.
    Startup,
    /// The externally-visible base URL changed.
    UrlChanged,
    /// Requested through the operator API.
    Manual,
    /// A token set was just issued.
    Authorized,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::UrlChanged => "url_changed",
            Self::Manual => "manual",
            Self::Authorized => "authorized",
        })
    }
}

/// Where the host's externally-visible base URL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalUrlSource {
    Static(String),
    /// A file rewritten by whatever owns the public address (tunnel, proxy).
    File(PathBuf),
}

impl ExternalUrlSource {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        match (&config.external_url, &config.external_url_file) {
            (Some(url), _) => Ok(Self::Static(url.clone())),
            (None, Some(path)) => Ok(Self::File(path.clone())),
            (None, None) => anyhow::bail!("no external URL source configured"),
        }
    }

    /// Read the current base URL. Must be an absolute http(s) URL.
    pub async fn resolve(&self) -> anyhow::Result<String> {
        let raw = match self {
            Self::Static(url) => url.clone(),
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?
                .trim()
                .to_owned(),
        };
        let url = Url::parse(&raw).map_err(|e| anyhow::anyhow!("invalid external URL {raw:?}: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("external URL must be http(s): {raw}");
        }
        Ok(raw.trim_end_matches('/').to_owned())
    }

    /// Whether the URL can change while the process runs.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// Submits triggers to the reconciler task.
#[derive(Clone)]
pub struct ReconcileHandle {
    tx: mpsc::UnboundedSender<Trigger>,
    manager: Arc<SubscriptionManager>,
}

impl ReconcileHandle {
    pub fn new(manager: Arc<SubscriptionManager>) -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, manager }, rx)
    }

    /// Queue a reconciliation. Any attempt already running is superseded.
    ///
    /// Returns `false` if the reconciler task has stopped.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        self.manager.supersede();
        self.tx.send(trigger).is_ok()
    }
}

/// Spawn the task that runs reconciliations one at a time.
///
/// Triggers that pile up while an attempt runs are coalesced into one
/// follow-up attempt. A running attempt is never cancelled on shutdown so an
/// issued delete always has a known outcome; it is bounded by request timeouts.
pub fn spawn_reconciler(
    manager: Arc<SubscriptionManager>,
    mut rx: mpsc::UnboundedReceiver<Trigger>,
    source: Arc<ExternalUrlSource>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut trigger = tokio::select! {
                _ = shutdown.cancelled() => break,
                t = rx.recv() => match t {
                    Some(t) => t,
                    None => break,
                },
            };
            let mut coalesced = 0u32;
            while let Ok(next) = rx.try_recv() {
                trigger = next;
                coalesced += 1;
            }

            let base_url = match source.resolve().await {
                Ok(url) => url,
                Err(e) => {
                    error!(%trigger, err = %e, "cannot resolve external URL, skipping reconciliation");
                    continue;
                }
            };

            info!(%trigger, coalesced, base_url = %base_url, "reconciling subscription");
            let state = manager.reconcile(&base_url).await;
            info!(%trigger, %state, "reconciliation finished");
        }
    })
}

/// Spawn a poller that emits [`Trigger::UrlChanged`] when the external URL changes.
pub fn spawn_url_watcher(
    source: Arc<ExternalUrlSource>,
    handle: ReconcileHandle,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = source.resolve().await.ok();
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let current = match source.resolve().await {
                Ok(url) => url,
                Err(e) => {
                    warn!(err = %e, "external URL unavailable");
                    continue;
                }
            };
            if last.as_deref() == Some(current.as_str()) {
                continue;
            }
            info!(
                old = last.as_deref().unwrap_or("none"),
                new = %current,
                "external URL changed"
            );
            last = Some(current);
            if !handle.trigger(Trigger::UrlChanged) {
                break;
            }
        }
    })
}
