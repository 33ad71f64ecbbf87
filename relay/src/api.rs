// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Administration API
//!
//! Builds the axum router for the relay's thin HTTP surface. All
//! handlers share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                        |
//! |--------|------------------------|------------------------------------|
//! | GET    | `/health`              | Liveness probe                     |
//! | GET    | `/status`              | Sessions, trust records, queue     |
//! | GET    | `/queue`               | Pending offline payments           |
//! | POST   | `/queue/sweep`         | Submit pending payments now        |
//! | POST   | `/peers/:peer/unblock` | Administrative unblock             |
//! | POST   | `/receiving`           | Enable/disable payment acceptance  |

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use beam_protocol::identity::PeerId;
use beam_protocol::queue::{OfflineQueue, QueuedTransaction, SweepReport};
use beam_protocol::receiver::PaymentReceiver;
use beam_protocol::session::SessionEngine;
use beam_protocol::trust::{TrustInfo, TrustStore};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The relay's reported version string.
    pub version: String,
    /// The relay's own peer identity.
    pub peer_id: PeerId,
    /// Process start time, for uptime reporting.
    pub started_at: Instant,
    pub engine: Arc<SessionEngine>,
    pub trust: Arc<TrustStore>,
    pub queue: Arc<OfflineQueue>,
    pub receiver: Arc<PaymentReceiver>,
}

/// Builds the full axum [`Router`] with all administration routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/queue", get(queue_handler))
        .route("/queue/sweep", post(sweep_handler))
        .route("/peers/:peer/unblock", post(unblock_handler))
        .route("/receiving", post(receiving_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub peer_id: PeerId,
    pub uptime_secs: u64,
    pub receiving: bool,
    pub live_sessions: usize,
    pub sessions: Vec<beam_protocol::session::SessionInfo>,
    pub trust: Vec<TrustInfo>,
    pub queue_pending: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let queue_pending = match state.queue.pending() {
        Ok(pending) => pending.len(),
        Err(err) => return internal_error(err).into_response(),
    };
    Json(StatusResponse {
        version: state.version.clone(),
        peer_id: state.peer_id.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        receiving: state.receiver.is_receiving(),
        live_sessions: state.engine.session_count(),
        sessions: state.engine.snapshot(),
        trust: state.trust.snapshot(),
        queue_pending,
    })
    .into_response()
}

async fn queue_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.pending() {
        Ok(pending) => Json::<Vec<QueuedTransaction>>(pending).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn sweep_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.sweep().await {
        Ok(report) => Json::<SweepReport>(report).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnblockResponse {
    peer_id: String,
    unblocked: bool,
}

/// Unblocking a peer before its cool-down expires is an explicit
/// administrative decision, so it only exists here.
async fn unblock_handler(
    State(state): State<AppState>,
    Path(peer): Path<String>,
) -> impl IntoResponse {
    let peer_id = PeerId::from_string(&peer);
    let unblocked = state.trust.unblock(&peer_id);
    let status = if unblocked {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(UnblockResponse {
            peer_id: peer,
            unblocked,
        }),
    )
}

#[derive(Debug, Deserialize)]
struct ReceivingRequest {
    enabled: bool,
}

async fn receiving_handler(
    State(state): State<AppState>,
    Json(request): Json<ReceivingRequest>,
) -> impl IntoResponse {
    if request.enabled {
        state.receiver.start_receiving();
    } else {
        state.receiver.stop_receiving();
    }
    (StatusCode::OK, Json(serde_json::json!({ "receiving": request.enabled })))
}
