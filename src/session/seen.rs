//! Bounded cache of message IDs already processed.
//!
//! In a mesh of peers the same message can arrive over several paths; the
//! cache makes each ID count once. When full, the cache is cleared and
//! refilled, so a very late duplicate may be processed again.

use std::collections::HashSet;

/// Set of recently seen message IDs.
#[derive(Debug)]
pub struct SeenMessages {
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenMessages {
    /// Creates an empty cache holding at most `capacity` IDs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records `id`; returns `true` if it had been seen before.
    pub fn check_and_insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return true;
        }
        if self.ids.len() >= self.capacity {
            self.ids.clear();
        }
        self.ids.insert(id.to_string());
        false
    }

    /// Number of IDs currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if no ID is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
