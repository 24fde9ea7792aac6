// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The inbound webhook endpoint: verification challenge and event delivery.
//!
//! Neither handler looks at the subscription state. Deliveries are always
//! answered `200` because the remote API disables subscriptions after
//! repeated non-200 responses.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::events::DeliveredEvent;
use crate::state::AppState;
use crate::transport::auth::constant_time_eq;

/// Largest delivery body buffered. Event payloads are a few hundred bytes.
pub const MAX_DELIVERY_BYTES: usize = 256 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct ChallengeQuery {
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
}

/// `GET <webhook_path>`: echo `hub.challenge`, or answer an empty 200 probe.
pub async fn verify(
    State(s): State<Arc<AppState>>,
    query: Result<Query<ChallengeQuery>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let Some(challenge) = query.challenge.filter(|c| !c.is_empty()) else {
        return StatusCode::OK.into_response();
    };

    if s.config.strict_verify_token {
        let presented = query.verify_token.as_deref().unwrap_or("");
        if !constant_time_eq(presented, &s.config.verify_token) {
            warn!(mode = query.mode.as_deref().unwrap_or(""), "challenge with wrong verify token");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    debug!(mode = query.mode.as_deref().unwrap_or(""), "answering subscription challenge");
    (StatusCode::OK, Json(serde_json::json!({ "hub.challenge": challenge }))).into_response()
}

/// `POST <webhook_path>`: forward the event payload, always answer 200.
pub async fn deliver(
    State(s): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!(err = %e, status = %e.status(), "discarding unreadable event payload");
            return StatusCode::OK;
        }
    };
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(err = %e, len = body.len(), "discarding malformed event payload");
            return StatusCode::OK;
        }
    };

    let delivered = DeliveredEvent::new(payload);
    debug!(
        object_type = %delivered.event.object_type,
        aspect_type = %delivered.event.aspect_type,
        "event received"
    );
    if s.events.send(delivered).is_err() {
        warn!("no event consumer registered, event dropped");
    }
    StatusCode::OK
}
