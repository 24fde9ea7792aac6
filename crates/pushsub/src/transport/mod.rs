// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: the webhook endpoint and the operator API.

pub mod auth;
pub mod http;
pub mod webhook;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AUTH_CALLBACK_PATH;
use crate::state::AppState;

/// Build the axum `Router` with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let webhook_path = state.config.webhook_path.clone();
    Router::new()
        // Webhook (no auth, called by the remote API)
        .route(
            &webhook_path,
            get(webhook::verify)
                .post(webhook::deliver)
                .layer(DefaultBodyLimit::max(webhook::MAX_DELIVERY_BYTES)),
        )
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Subscription
        .route(
            "/api/v1/subscription",
            get(http::subscription_status).delete(http::uninstall),
        )
        .route("/api/v1/subscription/reconcile", post(http::reconcile))
        // Authorization
        .route("/api/v1/auth/authorize", get(http::authorize))
        .route("/api/v1/auth/seed", post(http::seed))
        .route(AUTH_CALLBACK_PATH, get(http::auth_callback))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
