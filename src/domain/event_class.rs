//! Event class identifiers.
//!
//! An [`EventClass`] partitions event traffic into independent broadcast
//! domains such as `"time-selection"` or `"field-selection"`. Every
//! [`super::Coordinator`] serves exactly one class.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of an independent broadcast domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventClass(String);

impl EventClass {
    /// Creates an event class from any string-like name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the class name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventClass {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventClass {
    fn from(name: String) -> Self {
        Self(name)
    }
}
