//! collab-hub entry point.
//!
//! Joins or hosts a collaboration session and serves the status API.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use collab_hub::api;
use collab_hub::app_state::AppState;
use collab_hub::config::CollabConfig;
use collab_hub::session::CollabSession;

/// How long peers get to receive the close request on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = CollabConfig::from_env().map_err(|err| anyhow::anyhow!(err.to_string()))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(user = %config.user_name, port = config.port, "starting collab-hub");

    let session = CollabSession::new(config.session_settings());

    // Join an existing session first; host if that fails or hosting is forced
    let mut joined = false;
    if let Some(hostname) = config.hostname.as_deref() {
        match session.connect_to(hostname, config.port).await {
            Ok(_) => joined = true,
            Err(err) => tracing::warn!(%hostname, error = %err, "could not join peer"),
        }
    }
    if !joined || config.is_host {
        session.start_hosting(config.port).await?;
    }

    let app_state = AppState {
        session: Arc::clone(&session),
    };

    let app = Router::new().merge(api::build_router());
    #[cfg(feature = "swagger-ui")]
    let app = {
        use utoipa::OpenApi;
        app.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start status server
    let listener = tokio::net::TcpListener::bind(config.status_listen_addr).await?;
    tracing::info!(addr = %config.status_listen_addr, "status api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("collab-hub stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}
