use crate::container::{Addresses, HandlerKey, Slot};
use crate::error::{EBusError, Result};
use crate::policy::{HandlerPolicy, LockPolicy, NullBusId};
use crate::queue::EventQueue;
use crate::router::RouterList;
use crate::traits::{BusTraits, ConnectLock};
use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, error, trace};

/// Type-erased teardown used by the registry.
pub(crate) trait Teardown: Send + Sync {
    fn teardown(&self);
}

struct Registration<B: BusTraits> {
    id: B::BusId,
    target: usize,
    shared: bool,
}

/// Containers guarded by the context data lock.
pub(crate) struct ContextState<B: BusTraits> {
    pub(crate) addresses: Addresses<B>,
    pub(crate) routers: RouterList<B>,
    registrations: FxHashMap<HandlerKey, Registration<B>>,
    targets: FxHashMap<usize, Vec<HandlerKey>>,
}

impl<B: BusTraits> ContextState<B> {
    fn new() -> Self {
        Self {
            addresses: Addresses::new(),
            routers: RouterList::new(),
            registrations: FxHashMap::default(),
            targets: FxHashMap::default(),
        }
    }

    fn insert(
        &mut self,
        key: HandlerKey,
        handler: &Arc<B::Interface>,
        id: &B::BusId,
        shared: bool,
    ) -> Result<()> {
        let target = target_addr::<B>(handler);
        if let Some(keys) = self.targets.get(&target) {
            let conflict = keys.iter().filter_map(|k| self.registrations.get(k)).any(|r| {
                !(shared && r.shared) || r.id == *id
            });
            if conflict {
                return Err(EBusError::AlreadyConnected {
                    message: format!("bus id {id:?}").into(),
                    context: Some(B::name().into()),
                });
            }
        }

        let list = self.addresses.get(id);
        if B::HANDLER_POLICY == HandlerPolicy::Single && list.is_some_and(|l| !l.is_empty()) {
            return Err(EBusError::AddressOccupied {
                message: format!("bus id {id:?}").into(),
                context: Some(B::name().into()),
            });
        }

        self.addresses.get_or_insert(id).insert(Slot::new(key, Arc::clone(handler)));
        self.registrations.insert(key, Registration { id: id.clone(), target, shared });
        self.targets.entry(target).or_default().push(key);
        Ok(())
    }

    fn remove(&mut self, key: HandlerKey) -> Option<(B::BusId, Slot<B>)> {
        let registration = self.registrations.remove(&key)?;
        if let Some(keys) = self.targets.get_mut(&registration.target) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.targets.remove(&registration.target);
            }
        }
        let slot = self.addresses.remove(&registration.id, key)?;
        Some((registration.id, slot))
    }
}

/// Identity of a handler: the address of its allocation.
fn target_addr<B: BusTraits>(handler: &Arc<B::Interface>) -> usize {
    Arc::as_ptr(handler).cast::<()>().addr()
}

struct CallFrame<B: BusTraits> {
    id: Option<B::BusId>,
    handler: Option<HandlerKey>,
}

type CallStack<B> = Vec<CallFrame<B>>;

thread_local! {
    /// Call frames of the current thread, keyed by context address. Each value
    /// is a `CallStack<B>` for the bus owning that context.
    static CALLSTACKS: RefCell<FxHashMap<usize, Box<dyn Any>>> =
        RefCell::new(FxHashMap::default());
}

/// Shared state of one bus type.
///
/// Two locks with distinct jobs:
/// - `dispatch_lock` serializes dispatch and mutation for [`LockPolicy::Mutex`]
///   buses and is held across user code. It is re-entrant.
/// - `state` guards the containers and is never held across user code.
///
/// Call frames live in a thread-local map, so dispatches on different threads
/// never contend over them.
pub(crate) struct Context<B: BusTraits> {
    dispatch_lock: ReentrantMutex<()>,
    state: Mutex<ContextState<B>>,
    queue: EventQueue,
    next_key: AtomicU64,
    dispatches: AtomicUsize,
    alive: AtomicBool,
    _bus: PhantomData<fn() -> B>,
}

impl<B: BusTraits> Context<B> {
    pub(crate) fn new() -> Self {
        check_declaration::<B>();
        trace!(bus = B::name(), "Bus context created");
        Self {
            dispatch_lock: ReentrantMutex::new(()),
            state: Mutex::new(ContextState::new()),
            queue: EventQueue::new(B::QUEUEING_ACTIVE_BY_DEFAULT),
            next_key: AtomicU64::new(0),
            dispatches: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            _bus: PhantomData,
        }
    }

    /// Acquires the dispatch lock when the bus declares one.
    pub(crate) fn lock_dispatch(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        match B::LOCK_POLICY {
            LockPolicy::Mutex => Some(self.dispatch_lock.lock()),
            LockPolicy::Null => None,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ContextState<B>> {
        self.state.lock()
    }

    pub(crate) const fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Inserts `handler` at `id` and runs the connection hook.
    ///
    /// `shared` connections let one handler allocation sit at several ids.
    pub(crate) fn connect(
        &self,
        handler: &Arc<B::Interface>,
        id: &B::BusId,
        shared: bool,
    ) -> Result<HandlerKey> {
        let guard = self.lock_dispatch();
        let key = HandlerKey(self.next_key.fetch_add(1, Ordering::Relaxed) + 1);

        let inserted = self.state.lock().insert(key, handler, id, shared);
        if let Err(err) = inserted {
            error!(bus = B::name(), %err, "Connect refused");
            return Err(err);
        }
        debug!(bus = B::name(), %key, ?id, "Handler connected");

        let mut lock = ConnectLock::new(guard);
        B::on_connect(&mut lock, handler, id);
        Ok(key)
    }

    /// Removes the handler named by `key`. Unknown keys are ignored.
    pub(crate) fn disconnect(&self, key: HandlerKey) -> bool {
        let _guard = self.lock_dispatch();
        let Some((id, slot)) = self.state.lock().remove(key) else {
            return false;
        };
        debug!(bus = B::name(), %key, ?id, "Handler disconnected");
        B::on_disconnect(&slot.target, &id);
        true
    }

    pub(crate) fn is_connected(&self, key: HandlerKey) -> bool {
        self.is_alive() && self.state.lock().registrations.contains_key(&key)
    }

    /// Pushes a call frame for the current thread; popped when the guard drops.
    pub(crate) fn enter(&self, id: Option<B::BusId>) -> DispatchFrame<'_, B> {
        self.dispatches.fetch_add(1, Ordering::AcqRel);
        let key = self.frames_key();
        let _ = CALLSTACKS.try_with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            let stack = stacks
                .entry(key)
                .or_insert_with(|| -> Box<dyn Any> { Box::new(CallStack::<B>::new()) });
            if let Some(stack) = stack.downcast_mut::<CallStack<B>>() {
                stack.push(CallFrame { id, handler: None });
            }
        });
        DispatchFrame { ctx: self }
    }

    /// Updates the innermost frame of the current thread.
    pub(crate) fn mark(&self, id: Option<&B::BusId>, handler: Option<HandlerKey>) {
        let id = id.cloned();
        // The replaced id is dropped after the borrow ends.
        let _previous = self.with_frames(|stack| {
            stack.last_mut().and_then(|frame| {
                frame.handler = handler;
                std::mem::replace(&mut frame.id, id)
            })
        });
    }

    pub(crate) fn current_bus_id(&self) -> Option<B::BusId> {
        self.with_frames(|stack| stack.last().and_then(|frame| frame.id.clone())).flatten()
    }

    pub(crate) fn current_handler(&self) -> Option<HandlerKey> {
        self.with_frames(|stack| stack.last().and_then(|frame| frame.handler)).flatten()
    }

    pub(crate) fn is_in_dispatch(&self) -> bool {
        self.dispatches.load(Ordering::Acquire) > 0
    }

    pub(crate) fn is_in_dispatch_this_thread(&self) -> bool {
        self.with_frames(|stack| !stack.is_empty()).unwrap_or(false)
    }

    fn leave(&self) {
        let key = self.frames_key();
        let popped = CALLSTACKS
            .try_with(|stacks| {
                let mut stacks = stacks.borrow_mut();
                let stack = stacks.get_mut(&key)?.downcast_mut::<CallStack<B>>()?;
                let frame = stack.pop();
                if stack.is_empty() {
                    stacks.remove(&key);
                }
                frame
            })
            .ok()
            .flatten();
        drop(popped);
        self.dispatches.fetch_sub(1, Ordering::AcqRel);
    }

    /// Frames stay keyed by address only while a dispatch holds the context.
    fn frames_key(&self) -> usize {
        std::ptr::from_ref(self).addr()
    }

    fn with_frames<T>(&self, f: impl FnOnce(&mut CallStack<B>) -> T) -> Option<T> {
        let key = self.frames_key();
        CALLSTACKS
            .try_with(|stacks| {
                let mut stacks = stacks.borrow_mut();
                stacks.get_mut(&key)?.downcast_mut::<CallStack<B>>().map(f)
            })
            .ok()
            .flatten()
    }
}

impl<B: BusTraits> Teardown for Context<B> {
    fn teardown(&self) {
        self.alive.store(false, Ordering::Release);
        let released = {
            let mut state = self.state.lock();
            state.addresses.retire_all();
            state.routers.retire_all();
            std::mem::replace(&mut *state, ContextState::new())
        };
        let pending = self.queue.set_active(false);
        debug!(
            bus = B::name(),
            handlers = released.addresses.handler_count(),
            routers = released.routers.len(),
            pending,
            "Bus context torn down"
        );
    }
}

/// Call frame guard returned by [`Context::enter`].
pub(crate) struct DispatchFrame<'a, B: BusTraits> {
    ctx: &'a Context<B>,
}

impl<B: BusTraits> Drop for DispatchFrame<'_, B> {
    fn drop(&mut self) {
        self.ctx.leave();
    }
}

/// Reports declarations whose bus id type contradicts the address policy.
fn check_declaration<B: BusTraits>() {
    let null_id = TypeId::of::<B::BusId>() == TypeId::of::<NullBusId>();
    let has_id = B::ADDRESS_POLICY.has_id();
    if has_id && null_id {
        error!(
            bus = B::name(),
            policy = ?B::ADDRESS_POLICY,
            "Addressed bus declared with NullBusId; every handler shares one id"
        );
    } else if !has_id && !null_id {
        error!(
            bus = B::name(),
            bus_id = std::any::type_name::<B::BusId>(),
            "Single-address bus declared with a bus id type; ids are ignored"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AddressPolicy;

    trait Echo: Send + Sync {}
    struct Node;
    impl Echo for Node {}

    struct KeyedBus;
    impl BusTraits for KeyedBus {
        type Interface = dyn Echo;
        type BusId = u8;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
        const HANDLER_POLICY: HandlerPolicy = HandlerPolicy::Single;
    }

    #[test]
    fn shared_connections_allow_distinct_ids_only() {
        let ctx = Context::<KeyedBus>::new();
        let node: Arc<dyn Echo> = Arc::new(Node);

        let first = ctx.connect(&node, &1, true).unwrap();
        ctx.connect(&node, &2, true).unwrap();
        assert!(matches!(ctx.connect(&node, &2, true), Err(EBusError::AlreadyConnected { .. })));
        assert!(matches!(ctx.connect(&node, &3, false), Err(EBusError::AlreadyConnected { .. })));

        assert!(ctx.disconnect(first));
        assert!(!ctx.disconnect(first));
        assert_eq!(ctx.state().addresses.handler_count(), 1);
    }

    #[test]
    fn single_handler_address_rejects_second_handler() {
        let ctx = Context::<KeyedBus>::new();
        let a: Arc<dyn Echo> = Arc::new(Node);
        let b: Arc<dyn Echo> = Arc::new(Node);

        ctx.connect(&a, &7, false).unwrap();
        assert!(matches!(ctx.connect(&b, &7, false), Err(EBusError::AddressOccupied { .. })));
        ctx.connect(&b, &8, false).unwrap();
        assert_eq!(ctx.state().addresses.address_count(), 2);
    }

    #[test]
    fn frames_track_nesting_per_thread() {
        let ctx = Context::<KeyedBus>::new();
        assert!(!ctx.is_in_dispatch_this_thread());
        {
            let _outer = ctx.enter(Some(1));
            {
                let _inner = ctx.enter(Some(2));
                ctx.mark(Some(&2), Some(HandlerKey(9)));
                assert_eq!(ctx.current_bus_id(), Some(2));
                assert_eq!(ctx.current_handler(), Some(HandlerKey(9)));
            }
            assert_eq!(ctx.current_bus_id(), Some(1));
            assert!(ctx.is_in_dispatch());
        }
        assert!(!ctx.is_in_dispatch());
        assert_eq!(ctx.current_bus_id(), None);
    }

    #[test]
    fn teardown_retires_handlers() {
        let ctx = Context::<KeyedBus>::new();
        let node: Arc<dyn Echo> = Arc::new(Node);
        let key = ctx.connect(&node, &1, false).unwrap();
        let snapshot = ctx.state().addresses.snapshot_all();

        ctx.teardown();
        assert!(!ctx.is_alive());
        assert!(!ctx.is_connected(key));
        assert!(snapshot.iter().flat_map(|a| &a.slots).all(|s| !s.is_live()));
    }
}
