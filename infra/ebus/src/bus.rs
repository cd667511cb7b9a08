use crate::connection::Connection;
use crate::container::HandlerKey;
use crate::context::Context;
use crate::dispatch::{Mode, Target, dispatch};
use crate::error::{EBusError, Result};
use crate::queue::QueuedCall;
use crate::results::ResultSink;
use crate::router::BusRouter;
use crate::storage;
use crate::traits::BusTraits;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Public API of every declared bus.
///
/// Implemented for all [`BusTraits`] types; call it through the marker type:
/// `TickBus::broadcast(|h| h.on_tick(dt))`.
pub trait Bus: BusTraits {
    /// Connects `handler` at `id` and returns the guard that keeps it connected.
    ///
    /// On single-address buses `id` is ignored; pass `()`.
    ///
    /// # Errors
    /// Returns [`EBusError::AlreadyConnected`] if this handler allocation is
    /// already connected to the bus, or [`EBusError::AddressOccupied`] if the bus
    /// allows a single handler per address and `id` has one. The bus is left
    /// unchanged in both cases.
    fn connect(handler: Arc<Self::Interface>, id: Self::BusId) -> Result<Connection<Self>> {
        Connection::open(&handler, id)
    }

    /// Disconnects the handler named by `key`. Unknown keys are a no-op.
    fn disconnect_handler(key: HandlerKey) -> bool {
        storage::get::<Self>().is_some_and(|ctx| ctx.disconnect(key))
    }

    /// Sends the event to every handler at `id`.
    fn event<F>(id: &Self::BusId, f: F)
    where
        F: Fn(&Self::Interface),
    {
        run::<Self, ()>(Target::Address(id), Mode::forward(), &f, &mut |_| {});
    }

    /// Like [`Bus::event`], with handlers visited last to first.
    fn event_reverse<F>(id: &Self::BusId, f: F)
    where
        F: Fn(&Self::Interface),
    {
        run::<Self, ()>(Target::Address(id), Mode::reverse(), &f, &mut |_| {});
    }

    /// Sends the event to every handler at every address.
    fn broadcast<F>(f: F)
    where
        F: Fn(&Self::Interface),
    {
        run::<Self, ()>(Target::All, Mode::forward(), &f, &mut |_| {});
    }

    /// Like [`Bus::broadcast`], with addresses and handlers visited last to first.
    fn broadcast_reverse<F>(f: F)
    where
        F: Fn(&Self::Interface),
    {
        run::<Self, ()>(Target::All, Mode::reverse(), &f, &mut |_| {});
    }

    /// Sends the event to `id`, storing each handler's return value into
    /// `result`. The last handler invoked wins; with no handlers `result`
    /// keeps its value.
    fn event_result<R, F>(result: &mut R, id: &Self::BusId, f: F)
    where
        F: Fn(&Self::Interface) -> R,
    {
        run::<Self, R>(Target::Address(id), Mode::forward(), &f, &mut |r| *result = r);
    }

    fn event_result_reverse<R, F>(result: &mut R, id: &Self::BusId, f: F)
    where
        F: Fn(&Self::Interface) -> R,
    {
        run::<Self, R>(Target::Address(id), Mode::reverse(), &f, &mut |r| *result = r);
    }

    /// Broadcast form of [`Bus::event_result`].
    fn broadcast_result<R, F>(result: &mut R, f: F)
    where
        F: Fn(&Self::Interface) -> R,
    {
        run::<Self, R>(Target::All, Mode::forward(), &f, &mut |r| *result = r);
    }

    fn broadcast_result_reverse<R, F>(result: &mut R, f: F)
    where
        F: Fn(&Self::Interface) -> R,
    {
        run::<Self, R>(Target::All, Mode::reverse(), &f, &mut |r| *result = r);
    }

    /// Sends the event to `id`, passing every return value to `sink`.
    fn event_collect<R, S, F>(sink: &mut S, id: &Self::BusId, f: F)
    where
        S: ResultSink<R>,
        F: Fn(&Self::Interface) -> R,
    {
        run::<Self, R>(Target::Address(id), Mode::forward(), &f, &mut |r| sink.accept(r));
    }

    /// Broadcast form of [`Bus::event_collect`].
    fn broadcast_collect<R, S, F>(sink: &mut S, f: F)
    where
        S: ResultSink<R>,
        F: Fn(&Self::Interface) -> R,
    {
        run::<Self, R>(Target::All, Mode::forward(), &f, &mut |r| sink.accept(r));
    }

    /// Queues an event for `id`. It is delivered by the next
    /// [`Bus::execute_queued_events`], to the handlers connected at that time.
    fn queue_event<F>(id: Self::BusId, f: F)
    where
        F: Fn(&Self::Interface) + Send + 'static,
    {
        enqueue::<Self>(Box::new(move || {
            run_queued::<Self>(Target::Address(&id), Mode::forward(), &f);
        }));
    }

    fn queue_event_reverse<F>(id: Self::BusId, f: F)
    where
        F: Fn(&Self::Interface) + Send + 'static,
    {
        enqueue::<Self>(Box::new(move || {
            run_queued::<Self>(Target::Address(&id), Mode::reverse(), &f);
        }));
    }

    fn queue_broadcast<F>(f: F)
    where
        F: Fn(&Self::Interface) + Send + 'static,
    {
        enqueue::<Self>(Box::new(move || run_queued::<Self>(Target::All, Mode::forward(), &f)));
    }

    fn queue_broadcast_reverse<F>(f: F)
    where
        F: Fn(&Self::Interface) + Send + 'static,
    {
        enqueue::<Self>(Box::new(move || run_queued::<Self>(Target::All, Mode::reverse(), &f)));
    }

    /// Queues arbitrary work, run in order with queued events.
    fn queue_function<F>(f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        enqueue::<Self>(Box::new(f));
    }

    /// Runs everything queued so far, in FIFO order, on the calling thread.
    ///
    /// Work queued while executing waits for the next call. Returns how many
    /// queued items ran.
    fn execute_queued_events() -> usize {
        if !Self::ENABLE_EVENT_QUEUE {
            return 0;
        }
        let ctx = storage::get_or_create::<Self>();
        if !ctx.queue().is_active() {
            warn!(bus = Self::name(), "Executing queued events while queueing is inactive");
            return 0;
        }
        let calls = ctx.queue().take();
        // Released before user code runs so a queued teardown frees the context.
        drop(ctx);
        let count = calls.len();
        if count > 0 {
            trace!(bus = Self::name(), count, "Executing queued events");
        }
        calls.into_iter().for_each(|call| call());
        count
    }

    /// Drops queued work without running it. Returns how many items were dropped.
    fn clear_queued_events() -> usize {
        storage::get::<Self>().map_or(0, |ctx| ctx.queue().clear())
    }

    /// Turns queueing on or off. Turning it off discards pending work.
    fn set_queued_events_active(active: bool) {
        let ctx = storage::get_or_create::<Self>();
        let discarded = ctx.queue().set_active(active);
        debug!(bus = Self::name(), active, discarded, "Event queueing toggled");
    }

    #[must_use]
    fn is_queueing_active() -> bool {
        Self::ENABLE_EVENT_QUEUE && storage::get_or_create::<Self>().queue().is_active()
    }

    #[must_use]
    fn queued_event_count() -> usize {
        storage::get::<Self>().map_or(0, |ctx| ctx.queue().len())
    }

    /// Registers a router. Lower `order` runs earlier in the forward pass;
    /// equal orders run in registration order.
    ///
    /// A router added during a dispatch takes part from the next dispatch.
    ///
    /// # Errors
    /// Returns [`EBusError::RouterAlreadyConnected`] if this router allocation
    /// is already registered.
    fn add_router(router: Arc<dyn BusRouter<Self>>, order: i32) -> Result<()> {
        let ctx = storage::get_or_create::<Self>();
        let _serial = ctx.lock_dispatch();
        let inserted = ctx.state().routers.insert(router, order);
        match inserted {
            Ok(()) => {
                debug!(bus = Self::name(), order, "Router connected");
                Ok(())
            },
            Err(err) => {
                error!(bus = Self::name(), %err, "Router registration refused");
                Err(err)
            },
        }
    }

    /// Unregisters a router. Returns false if it was not registered.
    fn remove_router(router: &Arc<dyn BusRouter<Self>>) -> bool {
        let Some(ctx) = storage::get::<Self>() else {
            return false;
        };
        let _serial = ctx.lock_dispatch();
        let removed = ctx.state().routers.remove(router);
        if removed.is_some() {
            debug!(bus = Self::name(), "Router disconnected");
        }
        removed.is_some()
    }

    #[must_use]
    fn router_count() -> usize {
        storage::get::<Self>().map_or(0, |ctx| ctx.state().routers.len())
    }

    #[must_use]
    fn has_handlers() -> bool {
        Self::total_handlers() > 0
    }

    #[must_use]
    fn has_handlers_at(id: &Self::BusId) -> bool {
        storage::get::<Self>()
            .is_some_and(|ctx| ctx.state().addresses.get(id).is_some_and(|l| !l.is_empty()))
    }

    #[must_use]
    fn total_handlers() -> usize {
        storage::get::<Self>().map_or(0, |ctx| ctx.state().addresses.handler_count())
    }

    /// Number of addresses that currently have handlers.
    #[must_use]
    fn address_count() -> usize {
        storage::get::<Self>().map_or(0, |ctx| ctx.state().addresses.address_count())
    }

    /// Calls `f` on every handler in dispatch order until it returns false.
    fn enumerate_handlers<F>(mut f: F)
    where
        F: FnMut(&Self::Interface) -> bool,
    {
        let Some(ctx) = storage::get::<Self>() else {
            return;
        };
        let _serial = ctx.lock_dispatch();
        let addresses = ctx.state().addresses.snapshot_all();
        for slot in addresses.iter().flat_map(|a| &a.slots) {
            if slot.is_live() && !f(&*slot.target) {
                return;
            }
        }
    }

    /// Calls `f` on every handler at `id` until it returns false.
    fn enumerate_handlers_at<F>(id: &Self::BusId, mut f: F)
    where
        F: FnMut(&Self::Interface) -> bool,
    {
        let Some(ctx) = storage::get::<Self>() else {
            return;
        };
        let _serial = ctx.lock_dispatch();
        let Some(address) = ctx.state().addresses.snapshot_at(id) else {
            return;
        };
        for slot in &address.slots {
            if slot.is_live() && !f(&*slot.target) {
                return;
            }
        }
    }

    /// The first handler at `id`, the usual way to reach a single-handler address.
    #[must_use]
    fn find_first_handler(id: &Self::BusId) -> Option<Arc<Self::Interface>> {
        let ctx = storage::get::<Self>()?;
        let state = ctx.state();
        state.addresses.get(id)?.first().map(|slot| Arc::clone(&slot.target))
    }

    /// The id being dispatched to on this thread, if any.
    ///
    /// `None` outside dispatch, on single-address buses, and while routers run
    /// for a broadcast.
    #[must_use]
    fn current_bus_id() -> Option<Self::BusId> {
        storage::get::<Self>()?.current_bus_id()
    }

    /// The handler being invoked on this thread, if any.
    #[must_use]
    fn current_handler() -> Option<HandlerKey> {
        storage::get::<Self>()?.current_handler()
    }

    /// True while any thread is dispatching on this bus.
    #[must_use]
    fn is_in_dispatch() -> bool {
        storage::get::<Self>().is_some_and(|ctx| ctx.is_in_dispatch())
    }

    #[must_use]
    fn is_in_dispatch_this_thread() -> bool {
        storage::get::<Self>().is_some_and(|ctx| ctx.is_in_dispatch_this_thread())
    }

    /// True if the context has been created and not torn down since.
    #[must_use]
    fn context_exists() -> bool {
        storage::get::<Self>().is_some()
    }

    /// Tears down this bus's context. Connections become inert, routers and
    /// queued work are dropped. Returns false if there was no context.
    fn destroy_context() -> bool {
        storage::destroy::<Self>()
    }
}

impl<B: BusTraits> Bus for B {}

fn run<B: BusTraits, R>(
    target: Target<'_, B::BusId>,
    mode: Mode,
    event: &dyn Fn(&B::Interface) -> R,
    sink: &mut dyn FnMut(R),
) {
    let ctx: Arc<Context<B>> = storage::get_or_create::<B>();
    dispatch(&ctx, target, mode, event, sink);
}

fn run_queued<B: BusTraits>(
    target: Target<'_, B::BusId>,
    mode: Mode,
    event: &dyn Fn(&B::Interface),
) {
    if let Some(ctx) = storage::get::<B>() {
        dispatch(&ctx, target, mode.queued(), event, &mut |_| {});
    }
}

fn enqueue<B: BusTraits>(call: QueuedCall) {
    if !B::ENABLE_EVENT_QUEUE {
        let err = EBusError::PolicyViolation {
            message: "bus declared without an event queue".into(),
            context: Some(B::name().into()),
        };
        error!(bus = B::name(), %err, "Queued event dropped");
        return;
    }
    let ctx = storage::get_or_create::<B>();
    if !ctx.queue().push(call) {
        warn!(bus = B::name(), "Event queueing is inactive; queued event dropped");
    }
}
