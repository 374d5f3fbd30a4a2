//! Broadcast channel for session notices.
//!
//! [`NoticeBus`] wraps a [`tokio::sync::broadcast`] channel. The
//! collaboration session publishes a [`SessionNotice`] for every lifecycle
//! transition, and any number of observers subscribe.

use tokio::sync::broadcast;

use super::SessionNotice;

/// Broadcast bus for [`SessionNotice`]s.
///
/// When the ring buffer is full, the oldest notices are dropped for
/// lagging receivers.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<SessionNotice>,
}

impl NoticeBus {
    /// Creates a new `NoticeBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a notice to all subscribers.
    ///
    /// Returns the number of receivers that received the notice.
    /// If there are no active receivers, the notice is silently dropped.
    pub fn publish(&self, notice: SessionNotice) -> usize {
        self.sender.send(notice).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
