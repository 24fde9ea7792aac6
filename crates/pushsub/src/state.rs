// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::DeliveredEvent;
use crate::subscription::manager::SubscriptionManager;
use crate::subscription::trigger::{ExternalUrlSource, ReconcileHandle};
use crate::token::session::TokenSession;

/// Shared state behind the HTTP router.
pub struct AppState {
    pub config: Config,
    pub manager: Arc<SubscriptionManager>,
    pub tokens: Arc<TokenSession>,
    pub reconciler: ReconcileHandle,
    pub url_source: Arc<ExternalUrlSource>,
    /// Fan-out of delivered webhook events.
    pub events: broadcast::Sender<DeliveredEvent>,
    pub shutdown: CancellationToken,
}
