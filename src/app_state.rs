//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::session::CollabSession;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The collaboration session the status API reports on.
    pub session: Arc<CollabSession>,
}
