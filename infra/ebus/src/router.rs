//! Routers intercept every dispatch of a bus before and after its handlers.

use crate::error::{EBusError, Result};
use crate::traits::BusTraits;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a router asks of the rest of the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RouterProcessingState {
    /// Keep going.
    #[default]
    ContinueProcess,
    /// Later routers still run, handlers do not.
    SkipListeners,
    /// Stop the dispatch here. No handlers, no later routers, no post-pass.
    SkipListenersAndRouters,
}

/// Which router pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDirection {
    /// Before handlers, routers in ascending order.
    Forward,
    /// After handlers, routers in descending order. The returned state is ignored.
    Reverse,
}

/// An interceptor attached to every dispatch of bus `B`.
///
/// Routers are owned by their creator; the bus keeps a shared reference until
/// [`Bus::remove_router`](crate::Bus::remove_router) is called.
pub trait BusRouter<B: BusTraits>: Send + Sync {
    fn route(&self, event: &RoutedEvent<'_, B>) -> RouterProcessingState;
}

/// The event as seen by a router.
pub struct RoutedEvent<'a, B: BusTraits> {
    event: &'a dyn Fn(&B::Interface),
    bus_id: Option<&'a B::BusId>,
    queued: bool,
    reverse: bool,
    direction: RouteDirection,
}

impl<'a, B: BusTraits> RoutedEvent<'a, B> {
    pub(crate) const fn new(
        event: &'a dyn Fn(&B::Interface),
        bus_id: Option<&'a B::BusId>,
        queued: bool,
        reverse: bool,
    ) -> Self {
        Self { event, bus_id, queued, reverse, direction: RouteDirection::Forward }
    }

    pub(crate) const fn set_direction(&mut self, direction: RouteDirection) {
        self.direction = direction;
    }

    /// Delivers the event to `target`, which may be any implementation of the
    /// bus interface, including one that forwards to another bus.
    pub fn invoke(&self, target: &B::Interface) {
        B::process_event(target, self.event);
    }

    /// The addressed bus id, or `None` for broadcasts.
    #[must_use]
    pub const fn bus_id(&self) -> Option<&'a B::BusId> {
        self.bus_id
    }

    /// True when the event is delivered from the event queue.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.queued
    }

    /// True for `*_reverse` dispatches.
    #[must_use]
    pub const fn is_reverse_dispatch(&self) -> bool {
        self.reverse
    }

    #[must_use]
    pub const fn direction(&self) -> RouteDirection {
        self.direction
    }
}

impl<B: BusTraits> fmt::Debug for RoutedEvent<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedEvent")
            .field("bus", &B::name())
            .field("bus_id", &self.bus_id)
            .field("queued", &self.queued)
            .field("reverse", &self.reverse)
            .field("direction", &self.direction)
            .finish()
    }
}

pub(crate) type SharedRouter<B> = Arc<dyn BusRouter<B>>;

/// A registered router.
///
/// Dispatch snapshots share `live` with the list, so a router removed while a
/// dispatch is running is skipped for the rest of that dispatch.
pub(crate) struct RouterEntry<B: BusTraits> {
    router: SharedRouter<B>,
    order: i32,
    live: Arc<AtomicBool>,
}

impl<B: BusTraits> RouterEntry<B> {
    fn new(router: SharedRouter<B>, order: i32) -> Self {
        Self { router, order, live: Arc::new(AtomicBool::new(true)) }
    }

    /// Runs the router unless it was removed. Returns `None` when skipped.
    pub(crate) fn route(&self, event: &RoutedEvent<'_, B>) -> Option<RouterProcessingState> {
        self.is_live().then(|| self.router.route(event))
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl<B: BusTraits> Clone for RouterEntry<B> {
    fn clone(&self) -> Self {
        Self { router: Arc::clone(&self.router), order: self.order, live: Arc::clone(&self.live) }
    }
}

/// Routers sorted by `order`; equal orders keep registration order.
pub(crate) struct RouterList<B: BusTraits> {
    entries: Vec<RouterEntry<B>>,
}

impl<B: BusTraits> RouterList<B> {
    pub(crate) const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn insert(&mut self, router: SharedRouter<B>, order: i32) -> Result<()> {
        if self.position(&router).is_some() {
            return Err(EBusError::RouterAlreadyConnected {
                message: format!("order {order}").into(),
                context: Some(B::name().into()),
            });
        }
        let at = self.entries.partition_point(|e| e.order <= order);
        self.entries.insert(at, RouterEntry::new(router, order));
        Ok(())
    }

    pub(crate) fn remove(&mut self, router: &SharedRouter<B>) -> Option<SharedRouter<B>> {
        let at = self.position(router)?;
        let entry = self.entries.remove(at);
        entry.retire();
        Some(entry.router)
    }

    pub(crate) fn snapshot(&self) -> Vec<RouterEntry<B>> {
        self.entries.clone()
    }

    /// Retires every router so in-flight snapshots stop calling them.
    pub(crate) fn retire_all(&self) {
        self.entries.iter().for_each(RouterEntry::retire);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, router: &SharedRouter<B>) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| std::ptr::addr_eq(Arc::as_ptr(&e.router), Arc::as_ptr(router)))
    }
}
