//! `/health`: is the process up, and is anyone connected.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Snapshot of the local session, cheap enough to poll.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Name this session announces to peers.
    user: String,
    /// Whether the relay server accepts peers.
    hosting: bool,
    /// Peers that completed the handshake.
    peers: usize,
}

/// Answers `GET /health` from the live session.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Session liveness",
    description = "Reports whether the process is up, who it is and how many peers have joined.",
    responses(
        (status = 200, description = "Process is up", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let session = &state.session;
    let peers = session
        .connections()
        .iter()
        .filter(|info| info.valid)
        .count();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        user: session.user_name().to_string(),
        hosting: session.stats().is_running,
        peers,
    })
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
