use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Deferred work: a bound dispatch or an arbitrary function.
pub(crate) type QueuedCall = Box<dyn FnOnce() + Send>;

/// FIFO of deferred calls with its own lock.
///
/// The lock guards only the buffer. It is never held while a queued call runs,
/// and the context locks are never taken while it is held.
pub(crate) struct EventQueue {
    active: AtomicBool,
    pending: Mutex<VecDeque<QueuedCall>>,
}

impl EventQueue {
    pub(crate) fn new(active: bool) -> Self {
        Self { active: AtomicBool::new(active), pending: Mutex::new(VecDeque::new()) }
    }

    /// Appends `call`. Returns false, dropping `call`, when queueing is inactive.
    pub(crate) fn push(&self, call: QueuedCall) -> bool {
        let mut pending = self.pending.lock();
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        pending.push_back(call);
        true
    }

    /// Swaps the pending calls out. Calls queued afterwards wait for the next take.
    pub(crate) fn take(&self) -> VecDeque<QueuedCall> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Drops every pending call without running it. Returns how many were dropped.
    pub(crate) fn clear(&self) -> usize {
        let dropped = self.take();
        dropped.len()
    }

    /// Deactivating discards pending calls. Returns how many were discarded.
    pub(crate) fn set_active(&self, active: bool) -> usize {
        let discarded = {
            let mut pending = self.pending.lock();
            self.active.store(active, Ordering::Release);
            if active { VecDeque::new() } else { std::mem::take(&mut *pending) }
        };
        discarded.len()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("active", &self.is_active())
            .field("pending", &self.len())
            .finish()
    }
}
