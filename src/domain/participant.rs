//! Participants: the dual producer/consumer role.
//!
//! A participant embeds an [`ActionSource`], which carries its identity,
//! its event class and the back-reference to the coordinator it joined.
//! The coordinator calls [`Participant::receive`] for every event that
//! another participant emitted.
//!
//! # Reentrancy
//!
//! `receive` may call [`ActionSource::emit`] again. The coordinator never
//! re-delivers an event to its source, but a relayed emission carries the
//! relaying participant as its new source, so handlers must ignore events
//! that match their current state. Loops are broken by idempotent handlers,
//! not by the coordinator.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;

use super::{Coordinator, Event, EventClass, ParticipantId};

/// A unit that both emits into and receives from one coordinator.
pub trait Participant: Send + Sync {
    /// The embedded emitter that holds identity and coordinator link.
    fn source(&self) -> &ActionSource;

    /// Hook invoked for every event emitted by some *other* participant.
    fn receive(&self, event: &Event);

    /// Identity used for exclude-source delivery.
    fn id(&self) -> ParticipantId {
        self.source().id()
    }

    /// Declared event class.
    fn event_class(&self) -> &EventClass {
        self.source().event_class()
    }
}

/// Emitting half of a participant.
///
/// Holds a weak back-reference to the coordinator so that a dropped
/// coordinator does not stay alive through its participants.
#[derive(Debug)]
pub struct ActionSource {
    id: ParticipantId,
    class: EventClass,
    coordinator: RwLock<Weak<Coordinator>>,
}

impl ActionSource {
    /// Creates an unregistered source for the given class.
    #[must_use]
    pub fn new(class: impl Into<EventClass>) -> Self {
        Self {
            id: ParticipantId::new(),
            class: class.into(),
            coordinator: RwLock::new(Weak::new()),
        }
    }

    /// Identity of this source.
    #[must_use]
    pub const fn id(&self) -> ParticipantId {
        self.id
    }

    /// Declared event class.
    #[must_use]
    pub const fn event_class(&self) -> &EventClass {
        &self.class
    }

    /// The coordinator this source is registered with, if it is alive.
    #[must_use]
    pub fn coordinator(&self) -> Option<Arc<Coordinator>> {
        self.coordinator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Returns `true` while linked to a live coordinator.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.coordinator().is_some()
    }

    /// Emits `command` with `value` to every other participant.
    ///
    /// Returns the number of participants that received the event. Emitting
    /// before registration delivers to nobody.
    pub fn emit(&self, command: impl Into<String>, value: impl Into<Value>) -> usize {
        let Some(coordinator) = self.coordinator() else {
            tracing::debug!(participant = %self.id, class = %self.class, "emit on unregistered participant");
            return 0;
        };
        let event = Event::new(self.id, self.class.clone(), command, value);
        coordinator.broadcast_excluding_source(&event)
    }

    pub(crate) fn link(&self, coordinator: Weak<Coordinator>) {
        *self
            .coordinator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = coordinator;
    }

    /// Clears the link if it currently points at `coordinator`.
    pub(crate) fn unlink_from(&self, coordinator: &Coordinator) {
        let mut link = self
            .coordinator
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if std::ptr::eq(link.as_ptr(), coordinator) {
            *link = Weak::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_source_is_unregistered() {
        let source = ActionSource::new("time");
        assert!(!source.is_registered());
        assert_eq!(source.event_class().as_str(), "time");
    }

    #[test]
    fn emit_without_coordinator_reaches_nobody() {
        let source = ActionSource::new("time");
        assert_eq!(source.emit("select", 5), 0);
    }
}
