// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound calls: the remote subscription API and the callback reachability probe.

pub mod reachability;
pub mod registry;

use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build an HTTP client whose every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    ensure_crypto();
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::test_support::serve_ephemeral;

    #[tokio::test]
    async fn client_requests_are_bounded() -> anyhow::Result<()> {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = serve_ephemeral(router).await?;

        let client = http_client(Duration::from_millis(100))?;
        let started = std::time::Instant::now();
        let err = client.get(format!("http://{addr}/slow")).send().await.err();
        assert!(err.as_ref().is_some_and(|e| e.is_timeout()), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        Ok(())
    }
}
