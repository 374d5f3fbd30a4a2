//! Peer connection handlers: list, disconnect, stats.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};

use crate::api::dto::{ConnectionSummary, StatsResponse};
use crate::app_state::AppState;
use crate::error::{CollabError, ErrorResponse};
use crate::net::ConnectionId;

/// `GET /connections` — List live peer connections.
#[utoipa::path(
    get,
    path = "/api/v1/connections",
    tag = "Connections",
    summary = "List peer connections",
    description = "Returns every connection in the relay server's live set, dialed or accepted.",
    responses(
        (status = 200, description = "Live connections", body = Vec<ConnectionSummary>),
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<ConnectionSummary> = state
        .session
        .connections()
        .into_iter()
        .map(ConnectionSummary::from)
        .collect();
    Json(data)
}

/// `DELETE /connections/:id` — Close one peer connection.
///
/// # Errors
///
/// Returns [`CollabError::ConnectionNotFound`] if no live connection has
/// the given ID.
#[utoipa::path(
    delete,
    path = "/api/v1/connections/{id}",
    tag = "Connections",
    summary = "Disconnect a peer",
    description = "Sends a close request to the peer and closes the connection.",
    params(
        ("id" = uuid::Uuid, Path, description = "Connection UUID"),
    ),
    responses(
        (status = 204, description = "Connection closed"),
        (status = 404, description = "Connection not found", body = ErrorResponse),
    )
)]
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, CollabError> {
    state.session.disconnect(ConnectionId::from_uuid(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /stats` — Session and relay statistics.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Connections",
    summary = "Relay statistics",
    responses(
        (status = 200, description = "Current statistics", body = StatsResponse),
    )
)]
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse::collect(&state.session))
}

/// Connection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections))
        .route("/connections/{id}", delete(disconnect))
        .route("/stats", get(stats))
}
