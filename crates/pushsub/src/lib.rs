// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pushsub: keeps a single webhook push subscription registered with a
//! remote API and serves the endpoint that receives its events.

pub mod config;
pub mod error;
pub mod events;
pub mod persist;
pub mod remote;
pub mod state;
pub mod subscription;
pub mod test_support;
pub mod token;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::remote::reachability::ReachabilityCheck;
use crate::remote::registry::SubscriptionRegistry;
use crate::state::AppState;
use crate::subscription::manager::SubscriptionManager;
use crate::subscription::trigger::{
    spawn_reconciler, spawn_url_watcher, ExternalUrlSource, ReconcileHandle, Trigger,
};
use crate::subscription::{RecordStore, TeardownReport};
use crate::token::exchange::OAuthClient;
use crate::token::session::TokenSession;
use crate::transport::build_router;

const RECORD_FILE: &str = "subscription.json";
const TOKENS_FILE: &str = "tokens.json";

/// Build the token session and subscription manager from persisted state.
pub async fn build_manager(
    config: &Config,
) -> anyhow::Result<(Arc<SubscriptionManager>, Arc<TokenSession>)> {
    remote::ensure_crypto();
    let state_dir = config.state_dir();

    let oauth = OAuthClient {
        token_url: config.token_url.clone(),
        authorize_url: config.authorize_url.clone(),
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        scope: config.scope.clone(),
    };
    let tokens = Arc::new(TokenSession::new(
        oauth,
        config.request_timeout(),
        config.refresh_margin(),
        Some(state_dir.join(TOKENS_FILE)),
    )?);
    if tokens.load_persisted().await? {
        info!("loaded persisted token set");
    }

    let store = RecordStore::new(state_dir.join(RECORD_FILE));
    let record =
        store.load_or_create(&config.client_id, &config.client_secret, &config.verify_token)?;

    let manager = Arc::new(SubscriptionManager::new(
        record,
        store,
        SubscriptionRegistry::new(config.subscription_url.clone(), config.request_timeout())?,
        ReachabilityCheck::new(config.reachability_timeout())?,
        Arc::clone(&tokens),
        config.webhook_path.clone(),
    ));
    Ok((manager, tokens))
}

/// Assemble the shared application state.
///
/// Returns the trigger receiver that [`spawn_reconciler`] consumes.
pub async fn build(
    config: Config,
    shutdown: CancellationToken,
) -> anyhow::Result<(Arc<AppState>, mpsc::UnboundedReceiver<Trigger>)> {
    let (manager, tokens) = build_manager(&config).await?;
    let url_source = Arc::new(ExternalUrlSource::from_config(&config)?);
    let (reconciler, triggers) = ReconcileHandle::new(Arc::clone(&manager));
    let (events, _) = events::channel();

    let state = Arc::new(AppState {
        config,
        manager,
        tokens,
        reconciler,
        url_source,
        events,
        shutdown,
    });
    Ok((state, triggers))
}

/// Run the service until SIGINT or SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let (state, triggers) = build(config, shutdown.clone()).await?;

    let reconciler = spawn_reconciler(
        Arc::clone(&state.manager),
        triggers,
        Arc::clone(&state.url_source),
        shutdown.clone(),
    );
    events::spawn_event_logger(state.events.subscribe(), shutdown.clone());
    if state.url_source.is_dynamic() {
        spawn_url_watcher(
            Arc::clone(&state.url_source),
            state.reconciler.clone(),
            state.config.url_check_interval(),
            shutdown.clone(),
        );
    }
    spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        webhook_path = %state.config.webhook_path,
        "pushsub listening"
    );

    // Reachability checks call back into this server, so listen first.
    state.reconciler.trigger(Trigger::Startup);

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    // An in-flight reconciliation runs to completion.
    if let Err(e) = reconciler.await {
        error!("reconciler task failed: {e}");
    }
    info!("shutdown complete");
    Ok(())
}

/// Delete the remote subscription and all local state.
pub async fn uninstall(config: &Config) -> anyhow::Result<TeardownReport> {
    let (manager, tokens) = build_manager(config).await?;
    let report = manager.teardown().await;
    tokens.clear().await;
    if let Some(ref e) = report.error {
        warn!(err = %e, "remote subscription may still exist");
    }
    Ok(report)
}

/// Persisted subscription record and authorization state, secrets omitted.
pub async fn status(config: &Config) -> anyhow::Result<serde_json::Value> {
    let state_dir = config.state_dir();
    let record = RecordStore::new(state_dir.join(RECORD_FILE)).load()?;
    let tokens: Option<token::TokenSet> = persist::load(&state_dir.join(TOKENS_FILE))?;
    Ok(serde_json::json!({
        "state_dir": state_dir,
        "client_id": record.as_ref().map(|r| r.client_id.clone()),
        "webhook_id": record.as_ref().and_then(|r| r.webhook_id.clone()),
        "callback_url": record.as_ref().and_then(|r| r.callback_url.clone()),
        "authorized": tokens.is_some(),
        "token_expires_at": tokens.map(|t| t.expires_at),
    }))
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
            _ = shutdown.cancelled() => {}
        }
        shutdown.cancel();
    });
}
