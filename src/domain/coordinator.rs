//! In-process exclude-source broadcast hub.
//!
//! A [`Coordinator`] multiplexes one [`EventClass`] among a dynamic set of
//! participants. An event emitted by one participant is delivered to every
//! other registered participant and never back to its source.
//!
//! # Concurrency
//!
//! - The participant list sits behind a [`std::sync::RwLock`]; all
//!   operations are synchronous and never block on I/O.
//! - A broadcast snapshots the list and releases the lock before calling
//!   any `receive` hook, so handlers may emit, register or unregister.
//! - Delivery follows registration order within a broadcast.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::{Event, EventClass, Participant, ParticipantId};
use crate::error::CollabError;

/// Broadcast hub for a single event class.
pub struct Coordinator {
    class: EventClass,
    participants: RwLock<Vec<Arc<dyn Participant>>>,
    this: Weak<Coordinator>,
    delivered: AtomicU64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("class", &self.class)
            .field("participants", &self.participant_count())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a coordinator for `class`.
    #[must_use]
    pub fn new(class: impl Into<EventClass>) -> Arc<Self> {
        let class = class.into();
        Arc::new_cyclic(|this| Self {
            class,
            participants: RwLock::new(Vec::new()),
            this: Weak::clone(this),
            delivered: AtomicU64::new(0),
        })
    }

    /// The class this coordinator serves.
    #[must_use]
    pub const fn event_class(&self) -> &EventClass {
        &self.class
    }

    /// Registers a participant and links it back to this coordinator.
    ///
    /// Registering an already-registered participant is a no-op. A
    /// participant linked to another coordinator is moved here.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::EventClassMismatch`] if the participant
    /// declares a different class; nothing is registered in that case.
    pub fn register(&self, participant: Arc<dyn Participant>) -> Result<(), CollabError> {
        if participant.event_class() != &self.class {
            tracing::error!(
                expected = %self.class,
                actual = %participant.event_class(),
                participant = %participant.id(),
                "participant registered with wrong coordinator"
            );
            return Err(CollabError::EventClassMismatch {
                expected: self.class.clone(),
                actual: participant.event_class().clone(),
            });
        }

        if let Some(previous) = participant.source().coordinator()
            && !std::ptr::eq(Arc::as_ptr(&previous), self)
        {
            previous.unregister(participant.id());
        }

        let id = participant.id();
        {
            let mut list = self.write_list();
            if list.iter().any(|p| p.id() == id) {
                return Ok(());
            }
            participant.source().link(Weak::clone(&self.this));
            list.push(participant);
        }
        tracing::debug!(class = %self.class, participant = %id, "participant registered");
        Ok(())
    }

    /// Removes a participant. Unknown IDs are ignored.
    ///
    /// Returns `true` if a participant was removed.
    pub fn unregister(&self, id: ParticipantId) -> bool {
        let removed = {
            let mut list = self.write_list();
            list.iter()
                .position(|p| p.id() == id)
                .map(|index| list.remove(index))
        };
        match removed {
            Some(participant) => {
                participant.source().unlink_from(self);
                tracing::debug!(class = %self.class, participant = %id, "participant unregistered");
                true
            }
            None => false,
        }
    }

    /// Delivers `event` to every registered participant except its source.
    ///
    /// A recipient that panics is logged and skipped; the remaining
    /// recipients still receive the event. Events of another class are
    /// dropped. Returns the number of recipients the event was handed to.
    pub fn broadcast_excluding_source(&self, event: &Event) -> usize {
        if event.class() != &self.class {
            tracing::warn!(
                class = %self.class,
                event_class = %event.class(),
                "dropping event of foreign class"
            );
            return 0;
        }

        let snapshot: Vec<Arc<dyn Participant>> = self
            .read_list()
            .iter()
            .filter(|p| p.id() != event.source())
            .map(Arc::clone)
            .collect();

        for participant in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| participant.receive(event)));
            if outcome.is_err() {
                tracing::error!(
                    class = %self.class,
                    participant = %participant.id(),
                    command = event.command(),
                    "participant panicked while handling event"
                );
            }
        }

        self.delivered
            .fetch_add(snapshot.len() as u64, Ordering::Relaxed);
        snapshot.len()
    }

    /// Number of registered participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.read_list().len()
    }

    /// Returns `true` if a participant with `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.read_list().iter().any(|p| p.id() == id)
    }

    /// IDs of registered participants in registration order.
    #[must_use]
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.read_list().iter().map(|p| p.id()).collect()
    }

    /// Total number of deliveries performed so far.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn read_list(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Participant>>> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_list(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Participant>>> {
        self.participants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;
    use crate::domain::ActionSource;

    /// Records every event it receives.
    struct Recorder {
        source: ActionSource,
        received: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn new(class: &str) -> Arc<Self> {
            Arc::new(Self {
                source: ActionSource::new(class),
                received: Mutex::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<Event> {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Participant for Recorder {
        fn source(&self) -> &ActionSource {
            &self.source
        }

        fn receive(&self, event: &Event) {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        }
    }

    /// Mirrors the received value and re-emits it when its state changes.
    struct Mirror {
        source: ActionSource,
        value: Mutex<Value>,
        receives: AtomicU64,
    }

    impl Mirror {
        fn new(class: &str) -> Arc<Self> {
            Arc::new(Self {
                source: ActionSource::new(class),
                value: Mutex::new(Value::Null),
                receives: AtomicU64::new(0),
            })
        }
    }

    impl Participant for Mirror {
        fn source(&self) -> &ActionSource {
            &self.source
        }

        fn receive(&self, event: &Event) {
            self.receives.fetch_add(1, Ordering::Relaxed);
            {
                let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
                if *value == *event.payload() {
                    return;
                }
                *value = event.payload().clone();
            }
            self.source.emit(event.command(), event.payload().clone());
        }
    }

    struct Exploder {
        source: ActionSource,
    }

    impl Participant for Exploder {
        fn source(&self) -> &ActionSource {
            &self.source
        }

        fn receive(&self, _event: &Event) {
            panic!("handler failure");
        }
    }

    fn register_all(coordinator: &Coordinator, recorders: &[Arc<Recorder>]) {
        for r in recorders {
            let result = coordinator.register(Arc::clone(r) as Arc<dyn Participant>);
            assert!(result.is_ok());
        }
    }

    #[test]
    fn emission_reaches_all_but_source() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        let b = Recorder::new("time");
        let c = Recorder::new("time");
        register_all(&coordinator, &[Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);

        let delivered = a.source.emit("select", 5);
        assert_eq!(delivered, 2);

        assert!(a.received().is_empty());
        for peer in [&b, &c] {
            let got = peer.received();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].payload(), &Value::from(5));
            assert_eq!(got[0].source(), a.id());
            assert_eq!(got[0].command(), "select");
        }
    }

    #[test]
    fn every_participant_gets_n_minus_one() {
        let coordinator = Coordinator::new("field");
        let recorders: Vec<Arc<Recorder>> = (0..5).map(|_| Recorder::new("field")).collect();
        register_all(&coordinator, &recorders);

        for r in &recorders {
            assert_eq!(r.source.emit("pick", r.id().to_string()), 4);
        }
        for r in &recorders {
            let got = r.received();
            assert_eq!(got.len(), 4);
            assert!(got.iter().all(|e| e.source() != r.id()));
        }
    }

    #[test]
    fn mismatched_class_is_rejected() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        register_all(&coordinator, &[Arc::clone(&a)]);

        let wrong = Recorder::new("field");
        let result = coordinator.register(Arc::clone(&wrong) as Arc<dyn Participant>);
        let Err(CollabError::EventClassMismatch { expected, actual }) = result else {
            panic!("expected EventClassMismatch");
        };
        assert_eq!(expected.as_str(), "time");
        assert_eq!(actual.as_str(), "field");
        assert_eq!(coordinator.participant_count(), 1);
        assert!(!wrong.source.is_registered());
    }

    #[test]
    fn register_links_back_and_is_idempotent() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        register_all(&coordinator, &[Arc::clone(&a), Arc::clone(&a)]);
        assert_eq!(coordinator.participant_count(), 1);

        let Some(linked) = a.source.coordinator() else {
            panic!("participant not linked");
        };
        assert!(Arc::ptr_eq(&linked, &coordinator));
    }

    #[test]
    fn unregister_is_idempotent() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        let b = Recorder::new("time");
        let c = Recorder::new("time");
        register_all(&coordinator, &[Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);

        assert!(coordinator.unregister(b.id()));
        assert!(!coordinator.unregister(b.id()));
        assert!(!coordinator.unregister(ParticipantId::new()));

        assert_eq!(a.source.emit("select", 1), 1);
        assert_eq!(c.received().len(), 1);
        assert!(b.received().is_empty());
    }

    #[test]
    fn unregistered_participant_stops_receiving_and_emitting() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        let b = Recorder::new("time");
        register_all(&coordinator, &[Arc::clone(&a), Arc::clone(&b)]);

        b.source.emit("select", 1);
        a.source.emit("select", 2);
        assert_eq!(b.received().len(), 1);

        coordinator.unregister(b.id());
        assert!(!b.source.is_registered());

        a.source.emit("select", 3);
        assert_eq!(b.received().len(), 1);
        assert_eq!(b.source.emit("select", 4), 0);
        assert_eq!(a.received().len(), 1);
    }

    #[test]
    fn panicking_recipient_does_not_block_others() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        let exploder = Arc::new(Exploder {
            source: ActionSource::new("time"),
        });
        let c = Recorder::new("time");

        assert!(coordinator.register(Arc::clone(&a) as Arc<dyn Participant>).is_ok());
        assert!(coordinator.register(exploder as Arc<dyn Participant>).is_ok());
        assert!(coordinator.register(Arc::clone(&c) as Arc<dyn Participant>).is_ok());

        assert_eq!(a.source.emit("select", 9), 2);
        assert_eq!(c.received().len(), 1);
    }

    #[test]
    fn reentrant_emit_with_idempotent_handlers_terminates() {
        let coordinator = Coordinator::new("time");
        let m1 = Mirror::new("time");
        let m2 = Mirror::new("time");
        let origin = Recorder::new("time");

        assert!(coordinator.register(Arc::clone(&m1) as Arc<dyn Participant>).is_ok());
        assert!(coordinator.register(Arc::clone(&m2) as Arc<dyn Participant>).is_ok());
        assert!(coordinator.register(Arc::clone(&origin) as Arc<dyn Participant>).is_ok());

        origin.source.emit("select", 42);

        assert_eq!(
            *m1.value.lock().unwrap_or_else(PoisonError::into_inner),
            Value::from(42)
        );
        assert_eq!(
            *m2.value.lock().unwrap_or_else(PoisonError::into_inner),
            Value::from(42)
        );
        // origin, then one relay per mirror; the rest are ignored as no-ops.
        assert!(m1.receives.load(Ordering::Relaxed) <= 3);
        assert!(m2.receives.load(Ordering::Relaxed) <= 3);
        assert!(origin.received().iter().all(|e| e.payload() == &Value::from(42)));
    }

    #[test]
    fn handler_may_unregister_during_broadcast() {
        struct Leaver {
            source: ActionSource,
            hits: AtomicU64,
        }

        impl Participant for Leaver {
            fn source(&self) -> &ActionSource {
                &self.source
            }

            fn receive(&self, _event: &Event) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(coordinator) = self.source.coordinator() {
                    coordinator.unregister(self.source.id());
                }
            }
        }

        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        let leaver = Arc::new(Leaver {
            source: ActionSource::new("time"),
            hits: AtomicU64::new(0),
        });
        let c = Recorder::new("time");
        assert!(coordinator.register(Arc::clone(&a) as Arc<dyn Participant>).is_ok());
        assert!(coordinator.register(Arc::clone(&leaver) as Arc<dyn Participant>).is_ok());
        assert!(coordinator.register(Arc::clone(&c) as Arc<dyn Participant>).is_ok());

        assert_eq!(a.source.emit("select", 1), 2);
        assert_eq!(c.received().len(), 1);
        assert_eq!(coordinator.participant_count(), 2);

        a.source.emit("select", 2);
        assert_eq!(leaver.hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn moving_between_coordinators_unregisters_from_first() {
        let first = Coordinator::new("time");
        let second = Coordinator::new("time");
        let a = Recorder::new("time");
        assert!(first.register(Arc::clone(&a) as Arc<dyn Participant>).is_ok());
        assert!(second.register(Arc::clone(&a) as Arc<dyn Participant>).is_ok());
        assert!(!first.contains(a.id()));
        assert!(second.contains(a.id()));
    }

    #[test]
    fn foreign_class_event_is_dropped() {
        let coordinator = Coordinator::new("time");
        let a = Recorder::new("time");
        register_all(&coordinator, &[Arc::clone(&a)]);
        let event = Event::new(ParticipantId::new(), EventClass::new("field"), "pick", 1);
        assert_eq!(coordinator.broadcast_excluding_source(&event), 0);
        assert!(a.received().is_empty());
    }

    #[test]
    fn concurrent_emitters_deliver_everything() {
        let coordinator = Coordinator::new("time");
        let sink = Recorder::new("time");
        let emitters: Vec<Arc<Recorder>> = (0..4).map(|_| Recorder::new("time")).collect();
        register_all(&coordinator, &[Arc::clone(&sink)]);
        register_all(&coordinator, &emitters);

        let handles: Vec<_> = emitters
            .iter()
            .map(|e| {
                let e = Arc::clone(e);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        e.source.emit("tick", i);
                    }
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().is_ok());
        }

        assert_eq!(sink.received().len(), 200);
        assert_eq!(coordinator.delivered_count(), 200 * 4);
    }
}
