//! Participant that joins a coordinator to the network.

use std::sync::Weak;

use super::CollabSession;
use crate::domain::{ActionSource, Event, EventClass, Participant};

/// Network side of one event class.
///
/// As a receiver it forwards local events to every peer. As an emitter it
/// re-publishes remote events into its coordinator, where exclude-source
/// delivery keeps them from bouncing straight back out.
pub(crate) struct NetworkBridge {
    source: ActionSource,
    session: Weak<CollabSession>,
}

impl NetworkBridge {
    pub(crate) fn new(class: EventClass, session: Weak<CollabSession>) -> Self {
        Self {
            source: ActionSource::new(class),
            session,
        }
    }
}

impl std::fmt::Debug for NetworkBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkBridge")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Participant for NetworkBridge {
    fn source(&self) -> &ActionSource {
        &self.source
    }

    fn receive(&self, event: &Event) {
        if let Some(session) = self.session.upgrade() {
            session.forward_local_event(event);
        }
    }
}
