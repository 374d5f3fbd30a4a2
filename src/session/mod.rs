//! Session layer: the collaboration manager on top of the relay server.
//!
//! A [`CollabSession`] gives every wire line an [`Envelope`], drops
//! duplicates with [`SeenMessages`], runs the join handshake and bridges
//! coordinators to the network so participants in different processes
//! see each other's events.

mod bridge;
pub mod envelope;
mod inbound;
pub mod manager;
pub mod seen;

pub use envelope::{Envelope, EventRecord, MessageKind};
pub use manager::{CollabSession, SessionSettings};
pub use seen::SeenMessages;
