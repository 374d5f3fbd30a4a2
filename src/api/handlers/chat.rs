//! Chat handler.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{ChatRequest, ChatResponse};
use crate::app_state::AppState;

/// `POST /chat` — Send a chat line to every peer.
#[utoipa::path(
    post,
    path = "/api/v1/chat",
    tag = "Chat",
    summary = "Send chat",
    description = "Wraps the text in a chat envelope and writes it to every peer. Nothing is sent while sending is disabled.",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Chat queued", body = ChatResponse),
    )
)]
pub async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let delivered = state.session.send_chat(&req.text);
    Json(ChatResponse { delivered })
}

/// Chat routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/chat", post(send_chat))
}
