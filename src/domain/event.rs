//! Immutable events exchanged between participants.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{EventClass, ParticipantId};

/// A state-change notification emitted by one participant.
///
/// Built once by [`super::ActionSource::emit`] and never mutated; each
/// recipient sees the same value by reference. The payload is opaque to the
/// hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    source: ParticipantId,
    class: EventClass,
    command: String,
    payload: Value,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event authored by `source`.
    #[must_use]
    pub fn new(
        source: ParticipantId,
        class: EventClass,
        command: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Self {
        Self {
            source,
            class,
            command: command.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// Identity of the participant that produced the event.
    #[must_use]
    pub const fn source(&self) -> ParticipantId {
        self.source
    }

    /// Broadcast domain the event belongs to.
    #[must_use]
    pub const fn class(&self) -> &EventClass {
        &self.class
    }

    /// Command name, e.g. `"select"`.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Opaque payload value.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_return_constructor_values() {
        let source = ParticipantId::new();
        let event = Event::new(source, EventClass::new("time"), "select", 5);
        assert_eq!(event.source(), source);
        assert_eq!(event.class().as_str(), "time");
        assert_eq!(event.command(), "select");
        assert_eq!(event.payload(), &Value::from(5));
    }
}
