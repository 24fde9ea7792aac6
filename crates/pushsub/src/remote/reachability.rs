// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe that the advertised callback URL actually reaches this host.

use std::time::Duration;

use crate::error::SubscriptionError;

/// Issues a GET to the callback URL before the remote API is asked to.
///
/// The remote API verifies the same URL during creation, so a local failure
/// here means creation would fail too.
pub struct ReachabilityCheck {
    http: reqwest::Client,
}

impl ReachabilityCheck {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { http: crate::remote::http_client(timeout)? })
    }

    /// Any non-success status, connection failure or timeout is `Unreachable`.
    pub async fn verify(&self, callback_url: &str) -> Result<(), SubscriptionError> {
        let unreachable =
            |reason: String| SubscriptionError::Unreachable { url: callback_url.to_owned(), reason };

        let resp = self.http.get(callback_url).send().await.map_err(|e| {
            if e.is_timeout() {
                unreachable("timed out".to_owned())
            } else {
                unreachable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(unreachable(format!("HTTP {status}")))
        }
    }
}
