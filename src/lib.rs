//! # collab-hub
//!
//! Exclude-source broadcast hub and line-oriented relay server for
//! collaborative sessions.
//!
//! Inside one process, participants of the same event class share a
//! [`domain::Coordinator`]: whatever one participant emits reaches every
//! other participant, never the emitter. Across processes, a
//! [`session::CollabSession`] bridges coordinators onto a mesh of TCP
//! peers that relay newline-delimited lines to everyone except the sender.
//!
//! ## Architecture
//!
//! ```text
//! Participants ──► Coordinator (per EventClass)
//!                      │
//!                      ├── NetworkBridge (session/)
//!                      │
//!                  CollabSession ── envelope, dedupe, handshake
//!                      │
//!                  Server ── Connection ── peers (net/)
//!                      │
//!                  Status API (api/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
mod id;
pub mod net;
pub mod session;
