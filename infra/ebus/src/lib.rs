//! # EBus
//!
//! A typed, in-process publish/subscribe and request-dispatch bus.
//!
//! ## Overview
//!
//! A bus is declared by implementing [`BusTraits`] on a marker type. The
//! declaration names the handler interface (a trait object), the address key,
//! and a set of policies fixed for the lifetime of the bus type:
//!
//! * **Addressing**: one address, or many keyed by a bus id, optionally visited
//!   in a declared order ([`AddressPolicy`]).
//! * **Handlers**: one or many per address, optionally kept sorted ([`HandlerPolicy`]).
//! * **Storage**: one context per process or per thread ([`StoragePolicy`]).
//! * **Locking**: none, or a re-entrant dispatch mutex ([`LockPolicy`]).
//! * **Queueing**: events and closures deferred until
//!   [`Bus::execute_queued_events`].
//!
//! Every declared type gets the [`Bus`] API: synchronous `event`/`broadcast`
//! dispatch with reverse and result forms, queued dispatch, routers that can
//! intercept or short-circuit events, and introspection.
//!
//! # Example
//!
//! ```rust
//! use ebus::{AddressPolicy, Bus, BusTraits};
//! use std::sync::Arc;
//!
//! trait DoorEvents: Send + Sync {
//!     fn is_open(&self) -> bool;
//! }
//!
//! struct DoorBus;
//! impl BusTraits for DoorBus {
//!     type Interface = dyn DoorEvents;
//!     type BusId = u32;
//!     const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
//! }
//!
//! struct Door(bool);
//! impl DoorEvents for Door {
//!     fn is_open(&self) -> bool {
//!         self.0
//!     }
//! }
//!
//! let _front = DoorBus::connect(Arc::new(Door(true)), 1).unwrap();
//! let _back = DoorBus::connect(Arc::new(Door(false)), 2).unwrap();
//!
//! let mut open = false;
//! DoorBus::event_result(&mut open, &1, |door| door.is_open());
//! assert!(open);
//! ```

mod bus;
mod connection;
mod container;
mod context;
mod dispatch;
mod error;
mod policy;
mod queue;
mod results;
mod router;
mod storage;
mod traits;

pub use bus::Bus;
pub use connection::{Connection, MultiConnection};
pub use container::HandlerKey;
pub use error::{EBusError, EBusErrorExt, Result};
pub use policy::{AddressPolicy, HandlerPolicy, LockPolicy, NullBusId, StoragePolicy};
pub use results::{AggregateResults, LogicalResult, ReduceResult, ResultSink};
pub use router::{BusRouter, RouteDirection, RoutedEvent, RouterProcessingState};
pub use storage::{shutdown, shutdown_thread};
pub use traits::{BusTraits, ConnectLock};

/// Everything needed to declare, connect to and dispatch on a bus.
pub mod prelude {
    pub use crate::{
        AddressPolicy, Bus, BusRouter, BusTraits, Connection, HandlerPolicy, LockPolicy,
        NullBusId, RoutedEvent, RouterProcessingState, StoragePolicy,
    };
}
