//! Data Transfer Objects for REST request/response serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::net::{ConnectionInfo, ConnectionState};
use crate::session::CollabSession;

/// One live peer connection.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionSummary {
    /// Connection identifier.
    pub id: uuid::Uuid,
    /// Remote address, once known.
    pub peer_addr: Option<String>,
    /// User name announced by the peer.
    pub name: Option<String>,
    /// `true` when this process dialed the connection.
    pub is_local: bool,
    /// `connecting`, `open`, `closed` or `failed`.
    #[schema(value_type = String)]
    pub state: ConnectionState,
    /// Join handshake completed.
    pub valid: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last recorded error.
    pub last_error: Option<String>,
}

impl From<ConnectionInfo> for ConnectionSummary {
    fn from(info: ConnectionInfo) -> Self {
        Self {
            id: *info.id.as_uuid(),
            peer_addr: info.peer_addr.map(|addr| addr.to_string()),
            name: info.name,
            is_local: info.is_local,
            state: info.state,
            valid: info.valid,
            created_at: info.created_at,
            last_error: info.last_error,
        }
    }
}

/// Session and relay statistics.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Name announced to peers.
    pub user_name: String,
    /// Prefix of every outgoing message ID.
    pub session_id: uuid::Uuid,
    /// Whether the relay server accepts peers.
    pub is_hosting: bool,
    /// Bound address while hosting.
    pub local_addr: Option<String>,
    /// Connections ever added.
    pub total_connections: u64,
    /// Connections currently live.
    pub active_connections: usize,
    /// Lines received from peers.
    pub messages_routed: u64,
    /// Lines relayed to other peers.
    pub messages_relayed: u64,
    /// Event classes with a coordinator.
    pub event_classes: Vec<String>,
}

impl StatsResponse {
    /// Collects the current statistics of `session`.
    #[must_use]
    pub fn collect(session: &CollabSession) -> Self {
        let stats = session.stats();
        Self {
            user_name: session.user_name().to_string(),
            session_id: session.session_id(),
            is_hosting: stats.is_running,
            local_addr: stats.local_addr.map(|addr| addr.to_string()),
            total_connections: stats.total_connections,
            active_connections: stats.active_connections,
            messages_routed: stats.messages_routed,
            messages_relayed: stats.messages_relayed,
            event_classes: session
                .coordinators()
                .classes()
                .into_iter()
                .map(|class| class.to_string())
                .collect(),
        }
    }
}

/// Request body for `POST /api/v1/chat`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// Chat text; line breaks are sent as spaces.
    pub text: String,
}

/// Response body for `POST /api/v1/chat`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatResponse {
    /// Number of peers the line was queued on.
    pub delivered: usize,
}
