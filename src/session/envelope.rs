//! Wire envelope for session traffic.
//!
//! Every line on the wire has the form
//!
//! ```text
//! <message id>:<kind>:<user name>:<body>
//! ```
//!
//! The line is split on the first three `:` only, so the body may contain
//! the delimiter. Message IDs are `<session uuid>_<counter>` and are what
//! the seen-message cache deduplicates on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Event, EventClass};
use crate::error::CollabError;

/// Field delimiter.
pub const DELIMITER: char = ':';

/// Kind of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A dialing peer announces itself.
    NewUser,
    /// Answer to [`MessageKind::NewUser`]; body `ok` or `no`.
    AckNewUser,
    /// The sender asks the receiver to drop the connection.
    Close,
    /// Chat text.
    Chat,
    /// A coordinator event; body is an [`EventRecord`] as JSON.
    Event,
}

impl MessageKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewUser => "collab.newuser",
            Self::AckNewUser => "collab.acknewuser",
            Self::Close => "collab.close",
            Self::Chat => "collab.message",
            Self::Event => "collab.event",
        }
    }

    /// Whether peers forward this kind to their other connections.
    #[must_use]
    pub const fn should_relay(self) -> bool {
        matches!(self, Self::Chat | Self::Event)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = CollabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collab.newuser" => Ok(Self::NewUser),
            "collab.acknewuser" => Ok(Self::AckNewUser),
            "collab.close" => Ok(Self::Close),
            "collab.message" => Ok(Self::Chat),
            "collab.event" => Ok(Self::Event),
            other => Err(CollabError::InvalidEnvelope(format!(
                "unknown message kind: {other}"
            ))),
        }
    }
}

/// One parsed wire line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Globally unique message ID.
    pub id: String,
    /// Message kind.
    pub kind: MessageKind,
    /// User name of the originating session.
    pub user: String,
    /// Kind-specific body.
    pub body: String,
}

impl Envelope {
    /// Builds an envelope, replacing line breaks in every field and the
    /// delimiter in the header fields so the line stays parseable.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: MessageKind,
        user: &str,
        body: &str,
    ) -> Self {
        let header = |s: &str| s.replace([DELIMITER, '\n', '\r'], "_");
        Self {
            id: header(&id.into()),
            kind,
            user: header(user),
            body: body.replace(['\n', '\r'], " "),
        }
    }

    /// Parses a wire line.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::InvalidEnvelope`] if the line has fewer than
    /// four fields or an unknown kind.
    pub fn parse(line: &str) -> Result<Self, CollabError> {
        let mut parts = line.splitn(4, DELIMITER);
        let (Some(id), Some(kind), Some(user), Some(body)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CollabError::InvalidEnvelope(format!(
                "expected 4 fields in {line:?}"
            )));
        };
        if id.is_empty() {
            return Err(CollabError::InvalidEnvelope("empty message id".to_string()));
        }
        Ok(Self {
            id: id.to_string(),
            kind: kind.parse()?,
            user: user.to_string(),
            body: body.to_string(),
        })
    }

    /// Renders the envelope as a wire line (without terminator).
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.id, self.kind, self.user, self.body
        )
    }
}

/// Body of a [`MessageKind::Event`] message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event class the event belongs to.
    pub class: EventClass,
    /// Command name.
    pub command: String,
    /// Opaque payload.
    pub payload: Value,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            class: event.class().clone(),
            command: event.command().to_string(),
            payload: event.payload().clone(),
        }
    }
}
