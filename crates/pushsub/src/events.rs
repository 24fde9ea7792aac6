// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivered webhook events and their fan-out to downstream consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Typed view of an activity event payload.
///
/// Every field is optional so unexpected shapes still deserialize; the raw
/// payload travels alongside in [`DeliveredEvent::payload`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// `activity` or `athlete`.
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub object_id: Option<u64>,
    /// `create`, `update` or `delete`.
    #[serde(default)]
    pub aspect_type: String,
    #[serde(default)]
    pub owner_id: Option<u64>,
    #[serde(default)]
    pub subscription_id: Option<u64>,
    #[serde(default)]
    pub event_time: Option<i64>,
    #[serde(default)]
    pub updates: serde_json::Map<String, serde_json::Value>,
}

/// An event as received on the webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveredEvent {
    pub received_at_ms: u64,
    pub event: ActivityEvent,
    pub payload: serde_json::Value,
}

impl DeliveredEvent {
    pub fn new(payload: serde_json::Value) -> Self {
        let event = serde_json::from_value(payload.clone()).unwrap_or_default();
        Self { received_at_ms: epoch_ms(), event, payload }
    }
}

/// Create the event fan-out channel.
pub fn channel() -> (broadcast::Sender<DeliveredEvent>, broadcast::Receiver<DeliveredEvent>) {
    broadcast::channel(256)
}

/// Spawn the default consumer, which logs each delivered event.
pub fn spawn_event_logger(
    mut rx: broadcast::Receiver<DeliveredEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delivered = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = rx.recv() => r,
            };
            match delivered {
                Ok(d) => info!(
                    object_type = %d.event.object_type,
                    object_id = d.event.object_id,
                    aspect_type = %d.event.aspect_type,
                    owner_id = d.event.owner_id,
                    "activity event delivered"
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
