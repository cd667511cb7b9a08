use crate::policy::{AddressPolicy, HandlerPolicy};
use crate::traits::BusTraits;
use fxhash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// Opaque identity of one handler connection on one bus type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey(pub(crate) u64);

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// One connected handler.
///
/// `live` is cleared on disconnect so that snapshots taken by an in-flight
/// dispatch skip handlers removed after the snapshot was taken.
pub(crate) struct Slot<B: BusTraits> {
    pub(crate) key: HandlerKey,
    pub(crate) target: Arc<B::Interface>,
    live: Arc<AtomicBool>,
}

impl<B: BusTraits> Slot<B> {
    pub(crate) fn new(key: HandlerKey, target: Arc<B::Interface>) -> Self {
        Self { key, target, live: Arc::new(AtomicBool::new(true)) }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.live.store(false, AtomicOrdering::Release);
    }
}

impl<B: BusTraits> Clone for Slot<B> {
    fn clone(&self) -> Self {
        Self { key: self.key, target: Arc::clone(&self.target), live: Arc::clone(&self.live) }
    }
}

impl<B: BusTraits> fmt::Debug for Slot<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("key", &self.key).field("live", &self.is_live()).finish()
    }
}

/// Handlers of one address, in invocation order.
pub(crate) struct HandlerList<B: BusTraits> {
    slots: Vec<Slot<B>>,
}

impl<B: BusTraits> HandlerList<B> {
    const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub(crate) fn insert(&mut self, slot: Slot<B>) {
        match B::HANDLER_POLICY {
            HandlerPolicy::MultipleAndOrdered => {
                let at = self
                    .slots
                    .iter()
                    .position(|s| B::compare_handlers(&slot.target, &s.target))
                    .unwrap_or(self.slots.len());
                self.slots.insert(at, slot);
            },
            HandlerPolicy::Single | HandlerPolicy::Multiple => self.slots.push(slot),
        }
    }

    fn remove(&mut self, key: HandlerKey) -> Option<Slot<B>> {
        let at = self.slots.iter().position(|s| s.key == key)?;
        let slot = self.slots.remove(at);
        slot.retire();
        Some(slot)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn first(&self) -> Option<&Slot<B>> {
        self.slots.first()
    }

    pub(crate) fn snapshot(&self) -> Vec<Slot<B>> {
        self.slots.clone()
    }

    fn retire_all(&self) {
        self.slots.iter().for_each(Slot::retire);
    }
}

/// Address storage of a bus, shaped by its [`AddressPolicy`].
pub(crate) enum Addresses<B: BusTraits> {
    Single(HandlerList<B>),
    Hashed(FxHashMap<B::BusId, HandlerList<B>>),
    /// Kept sorted by `compare_ids`; ties keep creation order.
    Ordered(Vec<(B::BusId, HandlerList<B>)>),
}

/// Handlers of one address captured for dispatch. `id` is `None` on single-address buses.
pub(crate) struct AddressSnapshot<B: BusTraits> {
    pub(crate) id: Option<B::BusId>,
    pub(crate) slots: Vec<Slot<B>>,
}

impl<B: BusTraits> Addresses<B> {
    pub(crate) fn new() -> Self {
        match B::ADDRESS_POLICY {
            AddressPolicy::Single => Self::Single(HandlerList::new()),
            AddressPolicy::ById => Self::Hashed(FxHashMap::default()),
            AddressPolicy::ByIdAndOrdered => Self::Ordered(Vec::new()),
        }
    }

    pub(crate) fn get(&self, id: &B::BusId) -> Option<&HandlerList<B>> {
        match self {
            Self::Single(list) => Some(list),
            Self::Hashed(map) => map.get(id),
            Self::Ordered(entries) => {
                ordered_position::<B>(entries, id).ok().map(|at| &entries[at].1)
            },
        }
    }

    /// Returns the handler list of `id`, creating the address if needed.
    pub(crate) fn get_or_insert(&mut self, id: &B::BusId) -> &mut HandlerList<B> {
        match self {
            Self::Single(list) => list,
            Self::Hashed(map) => map.entry(id.clone()).or_insert_with(HandlerList::new),
            Self::Ordered(entries) => {
                let at = match ordered_position::<B>(entries, id) {
                    Ok(at) => at,
                    Err(at) => {
                        entries.insert(at, (id.clone(), HandlerList::new()));
                        at
                    },
                };
                &mut entries[at].1
            },
        }
    }

    /// Removes one handler and prunes the address if it became empty.
    pub(crate) fn remove(&mut self, id: &B::BusId, key: HandlerKey) -> Option<Slot<B>> {
        match self {
            Self::Single(list) => list.remove(key),
            Self::Hashed(map) => {
                let list = map.get_mut(id)?;
                let slot = list.remove(key);
                if list.is_empty() {
                    map.remove(id);
                }
                slot
            },
            Self::Ordered(entries) => {
                let at = ordered_position::<B>(entries, id).ok()?;
                let slot = entries[at].1.remove(key);
                if entries[at].1.is_empty() {
                    entries.remove(at);
                }
                slot
            },
        }
    }

    pub(crate) fn snapshot_at(&self, id: &B::BusId) -> Option<AddressSnapshot<B>> {
        let list = self.get(id)?;
        let id = B::ADDRESS_POLICY.has_id().then(|| id.clone());
        Some(AddressSnapshot { id, slots: list.snapshot() })
    }

    /// Captures every non-empty address in visitation order.
    pub(crate) fn snapshot_all(&self) -> Vec<AddressSnapshot<B>> {
        match self {
            Self::Single(list) if list.is_empty() => Vec::new(),
            Self::Single(list) => vec![AddressSnapshot { id: None, slots: list.snapshot() }],
            Self::Hashed(map) => map
                .iter()
                .map(|(id, list)| AddressSnapshot { id: Some(id.clone()), slots: list.snapshot() })
                .collect(),
            Self::Ordered(entries) => entries
                .iter()
                .map(|(id, list)| AddressSnapshot { id: Some(id.clone()), slots: list.snapshot() })
                .collect(),
        }
    }

    pub(crate) fn handler_count(&self) -> usize {
        match self {
            Self::Single(list) => list.len(),
            Self::Hashed(map) => map.values().map(HandlerList::len).sum(),
            Self::Ordered(entries) => entries.iter().map(|(_, list)| list.len()).sum(),
        }
    }

    pub(crate) fn address_count(&self) -> usize {
        match self {
            Self::Single(list) => usize::from(!list.is_empty()),
            Self::Hashed(map) => map.len(),
            Self::Ordered(entries) => entries.len(),
        }
    }

    /// Retires every handler so in-flight dispatches stop reaching them.
    pub(crate) fn retire_all(&self) {
        match self {
            Self::Single(list) => list.retire_all(),
            Self::Hashed(map) => map.values().for_each(HandlerList::retire_all),
            Self::Ordered(entries) => entries.iter().for_each(|(_, list)| list.retire_all()),
        }
    }
}

fn ordered_position<B: BusTraits>(
    entries: &[(B::BusId, HandlerList<B>)],
    id: &B::BusId,
) -> Result<usize, usize> {
    let mut at = entries.partition_point(|(k, _)| B::compare_ids(k, id) == Ordering::Less);
    while at < entries.len() && B::compare_ids(&entries[at].0, id) == Ordering::Equal {
        if entries[at].0 == *id {
            return Ok(at);
        }
        at += 1;
    }
    Err(at)
}
