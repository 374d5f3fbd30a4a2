//! Session notices reflecting collaboration lifecycle changes.
//!
//! Every server or connection transition publishes a [`SessionNotice`]
//! through the [`super::NoticeBus`]. A front end observes these as a
//! passive status indicator.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::net::ConnectionId;

/// Lifecycle notice emitted by the collaboration session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum SessionNotice {
    /// The server started accepting connections.
    ServerStarted {
        /// Bound address.
        addr: SocketAddr,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The server stopped and closed every connection.
    ServerStopped {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A connection joined the live set.
    ClientAdded {
        /// Connection identifier.
        connection: ConnectionId,
        /// `true` when this process dialed the connection.
        is_local: bool,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A connection closed or failed and left the live set.
    ClientRemoved {
        /// Connection identifier.
        connection: ConnectionId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A peer completed the handshake and announced its user name.
    PeerNamed {
        /// Connection identifier.
        connection: ConnectionId,
        /// User name announced by the peer.
        name: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A peer was refused or refused us.
    ConnectionRejected {
        /// Connection identifier.
        connection: ConnectionId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A chat line arrived.
    Chat {
        /// User name of the author.
        from: String,
        /// Chat text.
        text: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl SessionNotice {
    /// Returns the connection this notice concerns, if any.
    #[must_use]
    pub const fn connection(&self) -> Option<ConnectionId> {
        match self {
            Self::ClientAdded { connection, .. }
            | Self::ClientRemoved { connection, .. }
            | Self::PeerNamed { connection, .. }
            | Self::ConnectionRejected { connection, .. } => Some(*connection),
            Self::ServerStarted { .. } | Self::ServerStopped { .. } | Self::Chat { .. } => None,
        }
    }
}
