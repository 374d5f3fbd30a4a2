//! Explicitly owned coordinators, one per event class.
//!
//! [`CoordinatorSet`] replaces a process-wide registry: whoever owns the
//! set (typically the collaboration session) hands coordinators to the
//! components that need them.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Coordinator, EventClass};

/// Map from event class to its coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorSet {
    coordinators: RwLock<BTreeMap<EventClass, Arc<Coordinator>>>,
}

impl CoordinatorSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the coordinator for `class`, creating it on first use.
    pub fn get_or_create(&self, class: &EventClass) -> Arc<Coordinator> {
        if let Some(existing) = self.get(class) {
            return existing;
        }
        let mut map = self
            .coordinators
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(class.clone())
                .or_insert_with(|| Coordinator::new(class.clone())),
        )
    }

    /// Returns the coordinator for `class` if one exists.
    #[must_use]
    pub fn get(&self, class: &EventClass) -> Option<Arc<Coordinator>> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .map(Arc::clone)
    }

    /// Removes and returns the coordinator for `class`.
    pub fn remove(&self, class: &EventClass) -> Option<Arc<Coordinator>> {
        self.coordinators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(class)
    }

    /// Classes with a live coordinator, in sorted order.
    #[must_use]
    pub fn classes(&self) -> Vec<EventClass> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of coordinators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no coordinator exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_same_instance() {
        let set = CoordinatorSet::new();
        let class = EventClass::new("time");
        let a = set.get_or_create(&class);
        let b = set.get_or_create(&class);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn classes_are_independent() {
        let set = CoordinatorSet::new();
        let time = set.get_or_create(&EventClass::new("time"));
        let field = set.get_or_create(&EventClass::new("field"));
        assert!(!Arc::ptr_eq(&time, &field));
        assert_eq!(
            set.classes(),
            vec![EventClass::new("field"), EventClass::new("time")]
        );
    }

    #[test]
    fn remove_drops_coordinator() {
        let set = CoordinatorSet::new();
        let class = EventClass::new("time");
        let _ = set.get_or_create(&class);
        assert!(set.remove(&class).is_some());
        assert!(set.get(&class).is_none());
        assert!(set.is_empty());
    }
}
