//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the status API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "collab-hub status API"),
    paths(
        handlers::system::health_handler,
        handlers::connections::list_connections,
        handlers::connections::disconnect,
        handlers::connections::stats,
        handlers::chat::send_chat,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        dto::ConnectionSummary,
        dto::StatsResponse,
        dto::ChatRequest,
        dto::ChatResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Connections", description = "Peer connections of the relay server"),
        (name = "Chat", description = "Session chat"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::session::{CollabSession, SessionSettings};

    fn app() -> (Router, Arc<CollabSession>) {
        let session = CollabSession::new(SessionSettings {
            user_name: "status".to_string(),
            bind_host: "127.0.0.1".to_string(),
            ..SessionSettings::default()
        });
        let state = AppState {
            session: Arc::clone(&session),
        };
        (build_router().with_state(state), session)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let Ok(response) = app.oneshot(request).await;
        let status = response.status();
        let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            let Ok(json) = serde_json::from_slice(&bytes) else {
                panic!("body is not JSON");
            };
            json
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        let Ok(request) = Request::get(uri).body(Body::empty()) else {
            panic!("bad request");
        };
        request
    }

    #[tokio::test]
    async fn health_reports_session() {
        let (app, session) = app();
        let Ok(_) = session.start_hosting(0).await else {
            panic!("start failed");
        };
        let (status, body) = call(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["user"], "status");
        assert_eq!(body["hosting"], true);
        assert_eq!(body["peers"], 0);
        session.stop_hosting().await;
    }

    #[tokio::test]
    async fn connections_start_empty() {
        let (app, _session) = app();
        let (status, body) = call(app, get("/api/v1/connections")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn disconnect_unknown_is_not_found() {
        let (app, _session) = app();
        let uri = format!("/api/v1/connections/{}", uuid::Uuid::new_v4());
        let Ok(request) = Request::delete(uri).body(Body::empty()) else {
            panic!("bad request");
        };
        let (status, body) = call(app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], 2001);
    }

    #[tokio::test]
    async fn stats_describe_session() {
        let (app, session) = app();
        assert!(session.bridge("time").is_ok());
        let (status, body) = call(app, get("/api/v1/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_name"], "status");
        assert_eq!(body["is_hosting"], false);
        assert_eq!(body["event_classes"], serde_json::json!(["time"]));
    }

    #[tokio::test]
    async fn chat_without_peers_delivers_nothing() {
        let (app, _session) = app();
        let Ok(request) = Request::post("/api/v1/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text":"hello"}"#))
        else {
            panic!("bad request");
        };
        let (status, body) = call(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], 0);
    }

    #[test]
    fn openapi_lists_every_path() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/connections",
            "/api/v1/connections/{id}",
            "/api/v1/stats",
            "/api/v1/chat",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn openapi_describes_error_body() {
        let doc = ApiDoc::openapi();
        let Some(components) = doc.components else {
            panic!("no components");
        };
        for schema in ["ErrorResponse", "ErrorBody"] {
            assert!(components.schemas.contains_key(schema), "missing {schema}");
        }
    }
}
