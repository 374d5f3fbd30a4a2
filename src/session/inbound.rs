//! Per-thread marker for inbound dispatch.
//!
//! While a remote message is being applied, local reactions to it must not
//! be written back to the network. Dispatch is synchronous on the read
//! task's thread, so a thread-local flag is enough.

use std::cell::Cell;

thread_local! {
    static INBOUND: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as dispatching inbound traffic until dropped.
#[derive(Debug)]
pub(crate) struct InboundGuard {
    previous: bool,
}

impl InboundGuard {
    pub(crate) fn enter() -> Self {
        Self {
            previous: INBOUND.replace(true),
        }
    }
}

impl Drop for InboundGuard {
    fn drop(&mut self) {
        INBOUND.set(self.previous);
    }
}

/// Returns `true` inside inbound dispatch on this thread.
pub(crate) fn active() -> bool {
    INBOUND.get()
}
