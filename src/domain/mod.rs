//! Domain layer: the in-process broadcast hub.
//!
//! This module contains event classes and events, the participant role
//! and its emitter, the exclude-source [`Coordinator`], the per-class
//! [`CoordinatorSet`], and the notice bus used to report session
//! lifecycle changes.

pub mod coordinator;
pub mod coordinator_set;
pub mod event;
pub mod event_class;
pub mod notice;
pub mod notice_bus;
pub mod participant;
pub mod participant_id;

pub use coordinator::Coordinator;
pub use coordinator_set::CoordinatorSet;
pub use event::Event;
pub use event_class::EventClass;
pub use notice::SessionNotice;
pub use notice_bus::NoticeBus;
pub use participant::{ActionSource, Participant};
pub use participant_id::ParticipantId;
