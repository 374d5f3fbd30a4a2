//! Client-side wrapper around a dialed [`Connection`].
//!
//! A [`Client`] is the symmetric counterpart of an accepted connection: it
//! actively dials a server and exposes a simple connected / not-connected
//! state plus the last error. A failed dial is not an `Err`; inspect
//! [`Client::is_connected`] and [`Client::last_error`] instead.

use std::sync::Arc;

use super::{Connection, ConnectionHandler, ConnectionOptions, ConnectionState};
use crate::error::CollabError;

/// Dialed connection to a relay server.
#[derive(Debug, Clone)]
pub struct Client {
    connection: Arc<Connection>,
}

impl Client {
    /// Dials `host:port`; traffic and close notifications go to `handler`.
    pub async fn connect(
        host: &str,
        port: u16,
        handler: Arc<dyn ConnectionHandler>,
        options: &ConnectionOptions,
    ) -> Self {
        let connection = Connection::dial(host, port, handler, options).await;
        Self { connection }
    }

    /// Returns `true` while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connection_ok()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Why the connection failed, if it did.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.connection.last_error()
    }

    /// Sends one line to the server.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub fn send(&self, message: impl Into<String>) -> Result<(), CollabError> {
        self.connection.send(message)
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.connection.close();
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}
