// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::*;
use crate::test_support::MockRemote;

fn oauth(remote: &MockRemote) -> OAuthClient {
    OAuthClient {
        token_url: remote.token_url(),
        authorize_url: remote.authorize_url(),
        client_id: "12345".into(),
        client_secret: "client-secret".into(),
        scope: "activity:read".into(),
    }
}

fn session(remote: &MockRemote, persist_path: Option<PathBuf>) -> anyhow::Result<TokenSession> {
    TokenSession::new(
        oauth(remote),
        Duration::from_secs(5),
        Duration::from_secs(300),
        persist_path,
    )
}

fn expiring() -> TokenSet {
    TokenSet {
        access_token: "stale".into(),
        refresh_token: "refresh-0".into(),
        expires_at: epoch_secs() + 10,
    }
}

#[tokio::test]
async fn not_authorized_without_tokens() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let tokens = session(&remote, None)?;
    assert_eq!(tokens.get_valid_token().await, Err(AuthError::NotAuthorized));
    assert!(!tokens.is_authorized().await);
    Ok(())
}

#[tokio::test]
async fn fresh_token_skips_refresh() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let tokens = session(&remote, None)?;
    tokens
        .seed(TokenSet {
            access_token: "current".into(),
            refresh_token: "rt".into(),
            expires_at: epoch_secs() + 3600,
        })
        .await;

    assert_eq!(tokens.get_valid_token().await, Ok("current".to_owned()));
    assert_eq!(remote.refreshes(), 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    remote.state.token_delay_ms.store(200, Ordering::SeqCst);
    let tokens = Arc::new(session(&remote, None)?);
    tokens.seed(expiring()).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tokens = Arc::clone(&tokens);
        handles.push(tokio::spawn(async move { tokens.get_valid_token().await }));
    }
    for handle in handles {
        assert_eq!(handle.await?, Ok("access-1".to_owned()));
    }

    assert_eq!(remote.refreshes(), 1);
    assert_eq!(tokens.refresh_count(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_requires_reauthorization() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    remote.state.reject_refresh.store(true, Ordering::SeqCst);
    let tokens = session(&remote, None)?;
    tokens.seed(expiring()).await;

    let err = tokens.get_valid_token().await;
    assert!(matches!(err, Err(AuthError::Rejected(ref msg)) if msg.contains("invalid_grant")));
    assert_eq!(tokens.refresh_count(), 0);
    Ok(())
}

#[tokio::test]
async fn unreachable_token_endpoint_is_transport_error() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = closed.local_addr()?;
    drop(closed);

    let mut client = oauth(&remote);
    client.token_url = format!("http://{addr}/oauth/token");
    let tokens = TokenSession::new(client, Duration::from_secs(2), Duration::from_secs(300), None)?;
    tokens.seed(expiring()).await;

    assert!(matches!(tokens.get_valid_token().await, Err(AuthError::Transport(_))));
    Ok(())
}

#[tokio::test]
async fn refreshed_tokens_are_persisted() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");

    let tokens = session(&remote, Some(path.clone()))?;
    tokens.seed(expiring()).await;
    assert_eq!(tokens.get_valid_token().await, Ok("access-1".to_owned()));

    let stored: Option<TokenSet> = crate::persist::load(&path)?;
    assert_eq!(stored.map(|t| t.refresh_token), Some("refresh-1".to_owned()));

    let restarted = session(&remote, Some(path))?;
    assert!(restarted.load_persisted().await?);
    assert_eq!(restarted.get_valid_token().await, Ok("access-1".to_owned()));
    assert_eq!(remote.refreshes(), 1);
    Ok(())
}

#[tokio::test]
async fn clear_forgets_persisted_tokens() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");

    let tokens = session(&remote, Some(path.clone()))?;
    tokens.seed(expiring()).await;
    assert!(path.exists());

    tokens.clear().await;
    assert!(!path.exists());
    assert_eq!(tokens.get_valid_token().await, Err(AuthError::NotAuthorized));
    Ok(())
}

#[tokio::test]
async fn authorization_code_flow() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let tokens = session(&remote, None)?;

    let req = tokens.begin_authorization("https://a.example/auth/external/callback").await?;
    assert!(req.auth_url.starts_with(&remote.authorize_url()));
    assert!(req.auth_url.contains(&format!("state={}", req.state)));
    assert!(req.auth_url.contains("client_id=12345"));
    assert!(req.auth_url.contains("approval_prompt=force"));

    tokens.complete_authorization(&req.state, "good-code").await?;
    assert_eq!(tokens.get_valid_token().await, Ok("access-code".to_owned()));

    // State is single-use.
    let replay = tokens.complete_authorization(&req.state, "good-code").await;
    assert!(matches!(replay, Err(AuthError::Rejected(_))));
    assert_eq!(remote.state.code_exchanges.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn bad_code_or_state_rejected() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let tokens = session(&remote, None)?;

    let unknown = tokens.complete_authorization("nope", "good-code").await;
    assert!(matches!(unknown, Err(AuthError::Rejected(_))));

    let req = tokens.begin_authorization("https://a.example/auth/external/callback").await?;
    let bad = tokens.complete_authorization(&req.state, "bad-code").await;
    assert!(matches!(bad, Err(AuthError::Rejected(_))));
    assert!(!tokens.is_authorized().await);
    Ok(())
}

#[tokio::test]
async fn seed_during_refresh_wins_on_disk() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    remote.state.token_delay_ms.store(300, Ordering::SeqCst);
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    let tokens = Arc::new(session(&remote, Some(path.clone()))?);
    tokens.seed(expiring()).await;

    let refreshing = {
        let tokens = Arc::clone(&tokens);
        tokio::spawn(async move { tokens.get_valid_token().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokens
        .seed(TokenSet {
            access_token: "operator".into(),
            refresh_token: "operator-refresh".into(),
            expires_at: epoch_secs() + 3600,
        })
        .await;
    assert_eq!(refreshing.await?, Ok("access-1".to_owned()));

    assert_eq!(tokens.get_valid_token().await, Ok("operator".to_owned()));
    let stored: Option<TokenSet> = crate::persist::load(&path)?;
    assert_eq!(stored.map(|t| t.access_token), Some("operator".to_owned()));

    let restarted = session(&remote, Some(path))?;
    assert!(restarted.load_persisted().await?);
    assert_eq!(restarted.get_valid_token().await, Ok("operator".to_owned()));
    Ok(())
}

#[tokio::test]
async fn expired_authorization_state_is_pruned() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let tokens = session(&remote, None)?;
    let issued_at = Instant::now()
        .checked_sub(PENDING_TTL + Duration::from_secs(1))
        .ok_or_else(|| anyhow::anyhow!("clock too close to boot"))?;
    tokens.pending.lock().await.insert(
        "stale".into(),
        PendingAuthorization {
            redirect_uri: "https://a.example/auth/external/callback".into(),
            issued_at,
        },
    );

    // Still present but no longer redeemable.
    let late = tokens.complete_authorization("stale", "good-code").await;
    assert!(matches!(late, Err(AuthError::Rejected(_))));
    assert_eq!(remote.state.code_exchanges.load(Ordering::SeqCst), 0);

    tokens.pending.lock().await.insert(
        "stale".into(),
        PendingAuthorization {
            redirect_uri: "https://a.example/auth/external/callback".into(),
            issued_at,
        },
    );
    let req = tokens.begin_authorization("https://a.example/auth/external/callback").await?;
    let pending = tokens.pending.lock().await;
    assert!(!pending.contains_key("stale"));
    assert!(pending.contains_key(&req.state));
    assert_eq!(pending.len(), 1);
    Ok(())
}

#[tokio::test]
async fn pending_authorizations_are_capped() -> anyhow::Result<()> {
    let remote = MockRemote::start().await?;
    let tokens = session(&remote, None)?;

    let first = tokens.begin_authorization("https://a.example/auth/external/callback").await?;
    let mut last = None;
    for _ in 0..(MAX_PENDING * 4) {
        last = Some(tokens.begin_authorization("https://a.example/auth/external/callback").await?);
    }
    assert_eq!(tokens.pending.lock().await.len(), MAX_PENDING);

    let evicted = tokens.complete_authorization(&first.state, "good-code").await;
    assert!(matches!(evicted, Err(AuthError::Rejected(_))));

    let last = last.ok_or_else(|| anyhow::anyhow!("no authorization issued"))?;
    tokens.complete_authorization(&last.state, "good-code").await?;
    assert!(tokens.is_authorized().await);
    Ok(())
}
