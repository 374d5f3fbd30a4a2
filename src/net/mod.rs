//! Network layer: line-oriented peer connections, the relay server and
//! the dialing client.
//!
//! Messages are newline-delimited UTF-8 lines over TCP. The layer treats
//! them as opaque; interpretation belongs to the session layer.

pub mod client;
pub mod connection;
pub mod connection_id;
pub mod server;

pub use client::Client;
pub use connection::{
    Connection, ConnectionHandler, ConnectionInfo, ConnectionOptions, ConnectionState,
};
pub use connection_id::ConnectionId;
pub use server::{Relay, Server, ServerListener, ServerStats};
