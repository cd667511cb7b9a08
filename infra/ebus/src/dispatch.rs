//! The dispatch algorithm shared by every event, broadcast and queued form.
//!
//! 1. Take the dispatch lock (only for `LockPolicy::Mutex` buses).
//! 2. Snapshot routers and the targeted addresses under the data lock, then
//!    release it. Handlers connected from here on wait for the next dispatch.
//! 3. Forward router pass in ascending order. Routers removed since the
//!    snapshot are skipped in both passes.
//! 4. Handler pass, skipping handlers retired after the snapshot.
//! 5. Reverse router pass in descending order, unless a router halted.

use crate::container::{AddressSnapshot, Slot};
use crate::context::Context;
use crate::router::{RouteDirection, RoutedEvent, RouterProcessingState};
use crate::traits::BusTraits;
use tracing::trace;

/// Which addresses a dispatch reaches.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'a, Id> {
    All,
    Address(&'a Id),
}

impl<'a, Id> Target<'a, Id> {
    const fn bus_id(self) -> Option<&'a Id> {
        match self {
            Self::All => None,
            Self::Address(id) => Some(id),
        }
    }
}

/// Per-dispatch flags that routers can observe.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Mode {
    pub(crate) reverse: bool,
    pub(crate) queued: bool,
}

impl Mode {
    pub(crate) const fn forward() -> Self {
        Self { reverse: false, queued: false }
    }

    pub(crate) const fn reverse() -> Self {
        Self { reverse: true, queued: false }
    }

    pub(crate) const fn queued(self) -> Self {
        Self { queued: true, ..self }
    }
}

/// Runs `event` on every targeted handler, feeding each return value to `sink`.
pub(crate) fn dispatch<B, R>(
    ctx: &Context<B>,
    target: Target<'_, B::BusId>,
    mode: Mode,
    event: &dyn Fn(&B::Interface) -> R,
    sink: &mut dyn FnMut(R),
) where
    B: BusTraits,
{
    let _serial = ctx.lock_dispatch();

    let (routers, addresses) = {
        let state = ctx.state();
        let addresses: Vec<AddressSnapshot<B>> = match target {
            Target::All => state.addresses.snapshot_all(),
            Target::Address(id) => state.addresses.snapshot_at(id).into_iter().collect(),
        };
        (state.routers.snapshot(), addresses)
    };

    trace!(
        bus = B::name(),
        addresses = addresses.len(),
        routers = routers.len(),
        reverse = mode.reverse,
        queued = mode.queued,
        "Dispatching event"
    );

    let bus_id = target.bus_id();
    let _frame = ctx.enter(bus_id.cloned());

    let notify = |handler: &B::Interface| {
        let _ = event(handler);
    };
    let mut routed = RoutedEvent::<B>::new(&notify, bus_id, mode.queued, mode.reverse);

    let mut skip_listeners = false;
    for router in &routers {
        match router.route(&routed) {
            None | Some(RouterProcessingState::ContinueProcess) => {},
            Some(RouterProcessingState::SkipListeners) => skip_listeners = true,
            Some(RouterProcessingState::SkipListenersAndRouters) => return,
        }
    }

    if !skip_listeners {
        if mode.reverse {
            for address in addresses.iter().rev() {
                visit(ctx, address, address.slots.iter().rev(), event, sink);
            }
        } else {
            for address in &addresses {
                visit(ctx, address, address.slots.iter(), event, sink);
            }
        }
        ctx.mark(bus_id, None);
    }

    routed.set_direction(RouteDirection::Reverse);
    for router in routers.iter().rev() {
        let _ = router.route(&routed);
    }
}

fn visit<'s, B, R>(
    ctx: &Context<B>,
    address: &AddressSnapshot<B>,
    slots: impl Iterator<Item = &'s Slot<B>>,
    event: &dyn Fn(&B::Interface) -> R,
    sink: &mut dyn FnMut(R),
) where
    B: BusTraits,
{
    for slot in slots {
        if !slot.is_live() {
            continue;
        }
        ctx.mark(address.id.as_ref(), Some(slot.key));
        sink(B::process_event(&*slot.target, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AddressPolicy, NullBusId};
    use parking_lot::Mutex;
    use std::sync::Arc;

    trait Log: Send + Sync {
        fn tag(&self) -> u32;
    }

    struct Tag(u32);
    impl Log for Tag {
        fn tag(&self) -> u32 {
            self.0
        }
    }

    struct PlainBus;
    impl BusTraits for PlainBus {
        type Interface = dyn Log;
        type BusId = NullBusId;
    }

    struct OrderedBus;
    impl BusTraits for OrderedBus {
        type Interface = dyn Log;
        type BusId = u32;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ByIdAndOrdered;

        fn compare_ids(lhs: &u32, rhs: &u32) -> std::cmp::Ordering {
            lhs.cmp(rhs)
        }
    }

    fn collect<B: BusTraits<Interface = dyn Log>>(
        ctx: &Context<B>,
        target: Target<'_, B::BusId>,
        mode: Mode,
    ) -> Vec<u32> {
        let seen = Mutex::new(Vec::new());
        let tag = |h: &(dyn Log + 'static)| h.tag();
        dispatch(ctx, target, mode, &tag, &mut |t| seen.lock().push(t));
        seen.into_inner()
    }

    #[test]
    fn reverse_walks_handlers_backwards() {
        let ctx = Context::<PlainBus>::new();
        for tag in 1..=3 {
            let handler: Arc<dyn Log> = Arc::new(Tag(tag));
            ctx.connect(&handler, &(), false).unwrap();
        }

        assert_eq!(collect(&ctx, Target::All, Mode::forward()), vec![1, 2, 3]);
        assert_eq!(collect(&ctx, Target::All, Mode::reverse()), vec![3, 2, 1]);
    }

    #[test]
    fn reverse_walks_ordered_addresses_backwards() {
        let ctx = Context::<OrderedBus>::new();
        for id in [20, 10, 30] {
            let handler: Arc<dyn Log> = Arc::new(Tag(id));
            ctx.connect(&handler, &id, false).unwrap();
        }

        assert_eq!(collect(&ctx, Target::All, Mode::forward()), vec![10, 20, 30]);
        assert_eq!(collect(&ctx, Target::All, Mode::reverse()), vec![30, 20, 10]);
        assert_eq!(collect(&ctx, Target::Address(&20), Mode::forward()), vec![20]);
        assert!(collect(&ctx, Target::Address(&99), Mode::forward()).is_empty());
    }
}
