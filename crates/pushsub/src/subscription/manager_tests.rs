// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::*;
use crate::test_support::{serve_callback, MockRemote};
use crate::token::exchange::OAuthClient;
use crate::token::{epoch_secs, TokenSet};

const WEBHOOK_PATH: &str = "/api/strava/webhook";

struct Harness {
    remote: MockRemote,
    tokens: Arc<TokenSession>,
    manager: Arc<SubscriptionManager>,
    store: RecordStore,
    _dir: tempfile::TempDir,
}

fn record() -> SubscriptionRecord {
    SubscriptionRecord::new("12345".into(), "client-secret".into(), "PUSHSUB_VERIFY".into())
}

async fn harness_with(record: SubscriptionRecord, authorized: bool) -> anyhow::Result<Harness> {
    let remote = MockRemote::start().await?;
    let dir = tempfile::tempdir()?;
    let store = RecordStore::new(dir.path().join("subscription.json"));
    store.save(&record)?;

    let tokens = Arc::new(TokenSession::new(
        OAuthClient {
            token_url: remote.token_url(),
            authorize_url: remote.authorize_url(),
            client_id: record.client_id.clone(),
            client_secret: record.client_secret.clone(),
            scope: "activity:read".into(),
        },
        Duration::from_secs(5),
        Duration::from_secs(300),
        None,
    )?);
    if authorized {
        tokens
            .seed(TokenSet {
                access_token: "access-0".into(),
                refresh_token: "refresh-0".into(),
                expires_at: epoch_secs() + 3600,
            })
            .await;
    }

    let manager = Arc::new(SubscriptionManager::new(
        record,
        store.clone(),
        SubscriptionRegistry::new(remote.subscription_url(), Duration::from_secs(5))?,
        ReachabilityCheck::new(Duration::from_secs(2))?,
        Arc::clone(&tokens),
        WEBHOOK_PATH,
    ));
    Ok(Harness { remote, tokens, manager, store, _dir: dir })
}

async fn harness() -> anyhow::Result<Harness> {
    harness_with(record(), true).await
}

/// A record that believes subscription 42 exists at `base`, with the mock agreeing.
async fn harness_subscribed(base: &str) -> anyhow::Result<Harness> {
    let mut rec = record();
    let h = harness_with(rec.clone(), true).await?;
    let id = h.remote.insert(&callback_url(base, WEBHOOK_PATH));
    assert_eq!(id, 42);
    rec.webhook_id = Some(id.to_string());
    rec.callback_url = Some(callback_url(base, WEBHOOK_PATH));
    h.store.save(&rec)?;
    let manager = Arc::new(SubscriptionManager::new(
        rec,
        h.store.clone(),
        SubscriptionRegistry::new(h.remote.subscription_url(), Duration::from_secs(5))?,
        ReachabilityCheck::new(Duration::from_secs(2))?,
        Arc::clone(&h.tokens),
        WEBHOOK_PATH,
    ));
    Ok(Harness { manager, ..h })
}

async fn closed_base() -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

fn error_kind(status: &SubscriptionStatus) -> Option<&str> {
    status.last_error.as_ref().map(|e| e.kind.as_str())
}

#[tokio::test]
async fn fresh_install_creates_subscription() -> anyhow::Result<()> {
    let h = harness().await?;
    let base = serve_callback(WEBHOOK_PATH).await?;

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);

    let rec = h.manager.record().await;
    assert_eq!(rec.webhook_id.as_deref(), Some("42"));
    assert_eq!(rec.callback_url, Some(format!("{base}{WEBHOOK_PATH}")));
    assert_eq!(h.store.load()?, Some(rec));
    assert_eq!(h.remote.creates(), 1);
    assert_eq!(h.remote.last_bearer().as_deref(), Some("access-0"));

    let status = h.manager.status().await;
    assert_eq!(status.state, SubscriptionState::Active);
    assert_eq!(status.webhook_id.as_deref(), Some("42"));
    assert!(status.last_error.is_none());
    Ok(())
}

#[tokio::test]
async fn reconcile_is_idempotent() -> anyhow::Result<()> {
    let h = harness().await?;
    let base = serve_callback(WEBHOOK_PATH).await?;

    h.manager.reconcile(&base).await;
    let first = h.manager.record().await;
    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);
    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);

    assert_eq!(h.remote.creates(), 1);
    assert_eq!(h.remote.deletes(), 0);
    assert_eq!(h.manager.record().await, first);
    Ok(())
}

#[tokio::test]
async fn existing_subscription_is_recovered() -> anyhow::Result<()> {
    let h = harness().await?;
    let base = serve_callback(WEBHOOK_PATH).await?;
    h.remote.insert(&callback_url(&base, WEBHOOK_PATH));

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);

    assert_eq!(h.manager.record().await.webhook_id.as_deref(), Some("42"));
    assert_eq!(h.remote.deletes(), 0);
    assert_eq!(h.remote.subscriptions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn recovered_subscription_with_old_url_is_replaced() -> anyhow::Result<()> {
    let h = harness().await?;
    let old = serve_callback(WEBHOOK_PATH).await?;
    let new = serve_callback(WEBHOOK_PATH).await?;
    h.remote.insert(&callback_url(&old, WEBHOOK_PATH));

    assert_eq!(h.manager.reconcile(&new).await, SubscriptionState::Active);

    let rec = h.manager.record().await;
    assert_eq!(rec.webhook_id.as_deref(), Some("43"));
    assert_eq!(rec.callback_url, Some(callback_url(&new, WEBHOOK_PATH)));
    assert_eq!(h.remote.deletes(), 1);
    Ok(())
}

#[tokio::test]
async fn url_drift_replaces_subscription() -> anyhow::Result<()> {
    let old = serve_callback(WEBHOOK_PATH).await?;
    let new = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&old).await?;

    assert_eq!(h.manager.reconcile(&new).await, SubscriptionState::Active);

    let rec = h.manager.record().await;
    assert_eq!(rec.webhook_id.as_deref(), Some("43"));
    assert_eq!(rec.callback_url, Some(callback_url(&new, WEBHOOK_PATH)));
    assert_eq!(h.store.load()?.and_then(|r| r.webhook_id), Some("43".to_owned()));
    assert_eq!(h.remote.deletes(), 1);
    assert_eq!(h.remote.creates(), 1);
    assert_eq!(
        h.remote.subscriptions().iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![43]
    );
    assert!(h.remote.max_live() <= 1);
    Ok(())
}

#[tokio::test]
async fn failed_delete_keeps_old_subscription() -> anyhow::Result<()> {
    let old = serve_callback(WEBHOOK_PATH).await?;
    let new = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&old).await?;
    h.remote.state.fail_delete.store(true, Ordering::SeqCst);

    assert_eq!(h.manager.reconcile(&new).await, SubscriptionState::Failed);

    assert_eq!(h.remote.creates(), 0);
    let rec = h.manager.record().await;
    assert_eq!(rec.webhook_id.as_deref(), Some("42"));
    assert_eq!(rec.callback_url, Some(callback_url(&old, WEBHOOK_PATH)));
    assert_eq!(error_kind(&h.manager.status().await), Some("remote"));
    Ok(())
}

#[tokio::test]
async fn unreachable_new_url_keeps_old_subscription() -> anyhow::Result<()> {
    let old = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&old).await?;

    assert_eq!(h.manager.reconcile(&closed_base().await?).await, SubscriptionState::Failed);

    assert_eq!(h.remote.deletes(), 0);
    assert_eq!(h.remote.creates(), 0);
    assert_eq!(h.remote.subscriptions().len(), 1);
    assert_eq!(h.manager.record().await.webhook_id.as_deref(), Some("42"));
    assert_eq!(error_kind(&h.manager.status().await), Some("unreachable"));
    Ok(())
}

#[tokio::test]
async fn unreachable_callback_never_creates() -> anyhow::Result<()> {
    let h = harness().await?;

    assert_eq!(h.manager.reconcile(&closed_base().await?).await, SubscriptionState::Failed);

    assert_eq!(h.remote.creates(), 0);
    assert_eq!(h.manager.record().await.webhook_id, None);
    Ok(())
}

#[tokio::test]
async fn superseded_after_delete_skips_create() -> anyhow::Result<()> {
    let old = serve_callback(WEBHOOK_PATH).await?;
    let new = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&old).await?;
    h.remote.state.delete_delay_ms.store(300, Ordering::SeqCst);

    let manager = Arc::clone(&h.manager);
    let task = tokio::spawn(async move { manager.reconcile(&new).await });
    tokio::time::timeout(Duration::from_secs(5), h.remote.state.delete_started.notified()).await?;
    h.manager.supersede();

    assert_eq!(task.await?, SubscriptionState::Failed);
    assert_eq!(h.remote.creates(), 0);
    assert!(h.remote.subscriptions().is_empty());
    assert_eq!(h.manager.record().await.webhook_id, None);
    assert_eq!(h.store.load()?.and_then(|r| r.webhook_id), None);
    assert_eq!(error_kind(&h.manager.status().await), Some("superseded"));
    Ok(())
}

#[tokio::test]
async fn status_is_readable_during_reconcile() -> anyhow::Result<()> {
    let old = serve_callback(WEBHOOK_PATH).await?;
    let new = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&old).await?;
    h.remote.state.delete_delay_ms.store(300, Ordering::SeqCst);

    let manager = Arc::clone(&h.manager);
    let task = tokio::spawn(async move { manager.reconcile(&new).await });
    tokio::time::timeout(Duration::from_secs(5), h.remote.state.delete_started.notified()).await?;

    let status = tokio::time::timeout(Duration::from_millis(100), h.manager.status()).await?;
    assert_eq!(status.state, SubscriptionState::Reconciling);

    assert_eq!(task.await?, SubscriptionState::Active);
    assert_eq!(h.manager.record().await.webhook_id.as_deref(), Some("43"));
    Ok(())
}

#[tokio::test]
async fn missing_tokens_leave_it_unconfigured() -> anyhow::Result<()> {
    let h = harness_with(record(), false).await?;
    let base = serve_callback(WEBHOOK_PATH).await?;

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Unconfigured);
    assert_eq!(h.remote.creates(), 0);
    assert_eq!(h.remote.lists(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_fails_with_auth_error() -> anyhow::Result<()> {
    let h = harness_with(record(), false).await?;
    h.tokens
        .seed(TokenSet {
            access_token: "stale".into(),
            refresh_token: "revoked".into(),
            expires_at: epoch_secs(),
        })
        .await;
    h.remote.state.reject_refresh.store(true, Ordering::SeqCst);
    let base = serve_callback(WEBHOOK_PATH).await?;

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Failed);
    assert_eq!(error_kind(&h.manager.status().await), Some("auth"));
    assert_eq!(h.remote.creates(), 0);
    Ok(())
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_create() -> anyhow::Result<()> {
    let h = harness_with(record(), false).await?;
    h.tokens
        .seed(TokenSet {
            access_token: "stale".into(),
            refresh_token: "refresh-0".into(),
            expires_at: epoch_secs() + 30,
        })
        .await;
    let base = serve_callback(WEBHOOK_PATH).await?;

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);
    assert_eq!(h.remote.refreshes(), 1);
    assert_eq!(h.remote.last_bearer().as_deref(), Some("access-1"));
    Ok(())
}

#[tokio::test]
async fn vanished_subscription_is_recreated() -> anyhow::Result<()> {
    let base = serve_callback(WEBHOOK_PATH).await?;
    let mut rec = record();
    rec.webhook_id = Some("7".into());
    rec.callback_url = Some(callback_url(&base, WEBHOOK_PATH));
    let h = harness_with(rec, true).await?;

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);

    assert_eq!(h.manager.record().await.webhook_id.as_deref(), Some("42"));
    assert_eq!(h.remote.creates(), 1);
    assert_eq!(h.remote.deletes(), 0);
    Ok(())
}

#[tokio::test]
async fn create_failure_is_reported() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.state.fail_create.store(true, Ordering::SeqCst);
    let base = serve_callback(WEBHOOK_PATH).await?;

    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Failed);
    assert_eq!(h.manager.record().await.webhook_id, None);

    // The next trigger retries.
    h.remote.state.fail_create.store(false, Ordering::SeqCst);
    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Active);
    Ok(())
}

#[tokio::test]
async fn teardown_deletes_and_forgets() -> anyhow::Result<()> {
    let base = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&base).await?;

    let report = h.manager.teardown().await;
    assert_eq!(
        report,
        TeardownReport { webhook_id: Some("42".into()), remote_deleted: true, error: None }
    );
    assert!(h.remote.subscriptions().is_empty());
    assert_eq!(h.store.load()?, None);
    assert_eq!(h.manager.state().await, SubscriptionState::Deleted);

    // Terminal: later triggers do nothing.
    assert_eq!(h.manager.reconcile(&base).await, SubscriptionState::Deleted);
    assert_eq!(h.remote.creates(), 0);
    Ok(())
}

#[tokio::test]
async fn teardown_failure_is_reported() -> anyhow::Result<()> {
    let base = serve_callback(WEBHOOK_PATH).await?;
    let h = harness_subscribed(&base).await?;
    h.remote.state.fail_delete.store(true, Ordering::SeqCst);

    let report = h.manager.teardown().await;
    assert_eq!(report.webhook_id.as_deref(), Some("42"));
    assert!(!report.remote_deleted);
    assert!(report.error.is_some());

    let status = h.manager.status().await;
    assert_eq!(status.state, SubscriptionState::Deleted);
    assert_eq!(status.webhook_id, None);
    assert_eq!(h.manager.record().await.webhook_id, None);
    Ok(())
}

#[tokio::test]
async fn teardown_removes_orphan() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.insert("https://orphan.example/api/strava/webhook");

    let report = h.manager.teardown().await;
    assert_eq!(report.webhook_id.as_deref(), Some("42"));
    assert!(report.remote_deleted);
    assert!(h.remote.subscriptions().is_empty());
    Ok(())
}

#[tokio::test]
async fn teardown_without_tokens_or_subscription_is_clean() -> anyhow::Result<()> {
    let h = harness_with(record(), false).await?;

    let report = h.manager.teardown().await;
    assert_eq!(report, TeardownReport { webhook_id: None, remote_deleted: false, error: None });
    assert_eq!(h.manager.state().await, SubscriptionState::Deleted);
    Ok(())
}
