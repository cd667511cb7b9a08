//! Per-bus-type context registry.
//!
//! Global contexts live in a process-wide map keyed by the bus marker's
//! [`TypeId`]; thread-local contexts live in a per-thread map with the same
//! shape. Contexts are created lazily on first access.

use crate::context::{Context, Teardown};
use crate::policy::StoragePolicy;
use crate::traits::BusTraits;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// A registered context, type-erased twice: once for lookup, once for teardown.
struct Entry {
    context: Arc<dyn Any + Send + Sync>,
    teardown: Arc<dyn Teardown>,
}

impl Entry {
    fn new<B: BusTraits>(ctx: &Arc<Context<B>>) -> Self {
        Self { context: ctx.clone(), teardown: ctx.clone() }
    }

    fn downcast<B: BusTraits>(&self) -> Option<Arc<Context<B>>> {
        Arc::clone(&self.context).downcast::<Context<B>>().ok()
    }
}

type Registry = FxHashMap<TypeId, Entry>;

static GLOBAL: LazyLock<RwLock<Registry>> = LazyLock::new(|| RwLock::new(Registry::default()));

thread_local! {
    static LOCAL: RefCell<Registry> = RefCell::new(Registry::default());
}

/// Returns the context of `B` if it has been created.
pub(crate) fn get<B: BusTraits>() -> Option<Arc<Context<B>>> {
    let key = TypeId::of::<B>();
    match B::STORAGE_POLICY {
        StoragePolicy::Global => GLOBAL.read().get(&key).and_then(Entry::downcast::<B>),
        StoragePolicy::ThreadLocal => LOCAL
            .try_with(|local| local.borrow().get(&key).and_then(Entry::downcast::<B>))
            .ok()
            .flatten(),
    }
}

/// Returns the context of `B`, creating it on first access.
///
/// Concurrent first callers observe the same context.
pub(crate) fn get_or_create<B: BusTraits>() -> Arc<Context<B>> {
    if let Some(ctx) = get::<B>() {
        return ctx;
    }

    let key = TypeId::of::<B>();
    match B::STORAGE_POLICY {
        StoragePolicy::Global => {
            // Built outside the registry lock: creation emits diagnostics, and a
            // subscriber may reach for another bus.
            let fresh = Arc::new(Context::<B>::new());
            let mut global = GLOBAL.write();
            if let Some(ctx) = global.get(&key).and_then(Entry::downcast::<B>) {
                return ctx;
            }
            global.insert(key, Entry::new(&fresh));
            fresh
        },
        StoragePolicy::ThreadLocal => {
            let ctx = Arc::new(Context::<B>::new());
            // During thread teardown the map is gone and the context stays detached.
            let _ = LOCAL.try_with(|local| local.borrow_mut().insert(key, Entry::new(&ctx)));
            ctx
        },
    }
}

/// Tears down the context of `B`. Returns false if none existed.
pub(crate) fn destroy<B: BusTraits>() -> bool {
    let key = TypeId::of::<B>();
    let removed = match B::STORAGE_POLICY {
        StoragePolicy::Global => GLOBAL.write().remove(&key),
        StoragePolicy::ThreadLocal => {
            LOCAL.try_with(|local| local.borrow_mut().remove(&key)).ok().flatten()
        },
    };

    // Teardown runs outside the registry lock: dropping handlers may re-enter the bus.
    let Some(entry) = removed else {
        return false;
    };
    entry.teardown.teardown();
    true
}

/// Tears down every process-global bus context.
///
/// Outstanding connections become inert and the next access to a bus creates
/// a fresh, empty context. Returns the number of contexts torn down.
#[must_use]
pub fn shutdown() -> usize {
    let drained: Vec<Entry> = GLOBAL.write().drain().map(|(_, entry)| entry).collect();
    let count = drained.len();
    drained.iter().for_each(|entry| entry.teardown.teardown());
    debug!(count, "Global bus contexts shut down");
    count
}

/// Tears down every thread-local bus context of the calling thread.
///
/// Returns the number of contexts torn down.
#[must_use]
pub fn shutdown_thread() -> usize {
    let drained: Vec<Entry> = LOCAL
        .try_with(|local| local.borrow_mut().drain().map(|(_, entry)| entry).collect())
        .unwrap_or_default();
    let count = drained.len();
    drained.iter().for_each(|entry| entry.teardown.teardown());
    debug!(count, "Thread-local bus contexts shut down");
    count
}
