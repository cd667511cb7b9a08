use crate::policy::{AddressPolicy, HandlerPolicy, LockPolicy, StoragePolicy};
use parking_lot::ReentrantMutexGuard;
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Declaration of a bus type.
///
/// Implement this on a zero-sized marker type. The associated consts pick the
/// policies and default to a single-address, multi-handler, process-global bus
/// without dispatch locking or event queue.
///
/// ```rust
/// use ebus::{Bus, BusTraits, NullBusId};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// trait TickEvents: Send + Sync {
///     fn on_tick(&self, delta: f32);
/// }
///
/// struct TickBus;
/// impl BusTraits for TickBus {
///     type Interface = dyn TickEvents;
///     type BusId = NullBusId;
/// }
///
/// #[derive(Default)]
/// struct Counter(AtomicU32);
/// impl TickEvents for Counter {
///     fn on_tick(&self, _delta: f32) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// let counter = Arc::new(Counter::default());
/// let _conn = TickBus::connect(counter.clone(), ()).unwrap();
/// TickBus::broadcast(|h| h.on_tick(0.016));
/// assert_eq!(counter.0.load(Ordering::Relaxed), 1);
/// ```
pub trait BusTraits: Sized + 'static {
    /// The handler interface, usually `dyn SomeEvents`.
    type Interface: ?Sized + Send + Sync + 'static;

    /// Address key. Use [`NullBusId`](crate::NullBusId) for single-address buses.
    type BusId: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    const ADDRESS_POLICY: AddressPolicy = AddressPolicy::Single;
    const HANDLER_POLICY: HandlerPolicy = HandlerPolicy::Multiple;
    const STORAGE_POLICY: StoragePolicy = StoragePolicy::Global;
    const LOCK_POLICY: LockPolicy = LockPolicy::Null;

    /// Enables `queue_*` and `execute_queued_events`.
    const ENABLE_EVENT_QUEUE: bool = false;

    /// When false, `set_queued_events_active(true)` must be called before the
    /// queue accepts anything.
    const QUEUEING_ACTIVE_BY_DEFAULT: bool = true;

    /// Returns true if `lhs` must run before `rhs`.
    ///
    /// Used only with [`HandlerPolicy::MultipleAndOrdered`]. Must be a strict
    /// weak order and must not call back into the bus.
    #[allow(unused_variables)]
    fn compare_handlers(lhs: &Self::Interface, rhs: &Self::Interface) -> bool {
        false
    }

    /// Address visitation order for unaddressed dispatch.
    ///
    /// Used only with [`AddressPolicy::ByIdAndOrdered`]. Must not call back into the bus.
    #[allow(unused_variables)]
    fn compare_ids(lhs: &Self::BusId, rhs: &Self::BusId) -> Ordering {
        Ordering::Equal
    }

    /// Runs right after a handler has been inserted.
    ///
    /// The connect lock is still held. Call [`ConnectLock::release`] before
    /// doing anything that may wait on another thread using this bus.
    #[allow(unused_variables)]
    fn on_connect(lock: &mut ConnectLock<'_>, handler: &Arc<Self::Interface>, id: &Self::BusId) {}

    /// Runs right after a handler has been removed, with the dispatch lock
    /// still held. `handler` is not reached by any later dispatch.
    #[allow(unused_variables)]
    fn on_disconnect(handler: &Arc<Self::Interface>, id: &Self::BusId) {}

    /// Performs the call on one handler or router target.
    fn process_event<R>(handler: &Self::Interface, event: &dyn Fn(&Self::Interface) -> R) -> R {
        event(handler)
    }

    /// Name used in diagnostics.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The dispatch lock held while a connection policy runs.
///
/// Inert for buses declared with [`LockPolicy::Null`].
pub struct ConnectLock<'a> {
    guard: Option<ReentrantMutexGuard<'a, ()>>,
}

impl<'a> ConnectLock<'a> {
    pub(crate) const fn new(guard: Option<ReentrantMutexGuard<'a, ()>>) -> Self {
        Self { guard }
    }

    /// Releases the lock early. Idempotent.
    pub fn release(&mut self) {
        self.guard = None;
    }

    /// True while the dispatch lock is held by this guard.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for ConnectLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectLock").field("held", &self.is_held()).finish()
    }
}
