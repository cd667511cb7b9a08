//! Policy tags selected by a bus declaration.
//!
//! Each bus type picks exactly one value of every policy for its entire
//! lifetime. Changing a policy means declaring a different bus type.

/// Bus id used by single-address buses.
pub type NullBusId = ();

/// How many addresses a bus has and how they are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressPolicy {
    /// One address; every event reaches every handler.
    #[default]
    Single,
    /// Many addresses keyed by bus id. Unaddressed broadcasts visit
    /// addresses in an unspecified order.
    ById,
    /// Many addresses keyed by bus id, visited in `BusTraits::compare_ids` order.
    ByIdAndOrdered,
}

impl AddressPolicy {
    /// True if the bus has more than one address.
    #[must_use]
    pub const fn has_id(self) -> bool {
        !matches!(self, Self::Single)
    }
}

/// How many handlers may attach to one address, and in which order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HandlerPolicy {
    /// At most one handler per address.
    Single,
    /// Any number of handlers, invoked in connection order.
    #[default]
    Multiple,
    /// Any number of handlers, kept sorted by `BusTraits::compare_handlers`.
    MultipleAndOrdered,
}

/// Where the shared context of a bus type lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoragePolicy {
    /// One context for the whole process.
    #[default]
    Global,
    /// One independent context per thread.
    ThreadLocal,
}

/// Dispatch serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockPolicy {
    /// No dispatch lock. Callers provide their own threading discipline.
    #[default]
    Null,
    /// Dispatch, connect, disconnect and router changes are serialized by a
    /// re-entrant mutex, so a handler may dispatch or (dis)connect on the same
    /// bus from inside a callback.
    Mutex,
}
