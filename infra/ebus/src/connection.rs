use crate::container::HandlerKey;
use crate::context::Context;
use crate::error::{EBusError, Result};
use crate::storage;
use crate::traits::BusTraits;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::error;

/// A live handler connection. Dropping it disconnects the handler.
///
/// The connection does not keep the bus context alive: after
/// [`shutdown`](crate::shutdown) or `destroy_context` it becomes inert.
#[must_use = "dropping a Connection disconnects the handler"]
pub struct Connection<B: BusTraits> {
    context: Weak<Context<B>>,
    key: HandlerKey,
    id: B::BusId,
}

impl<B: BusTraits> Connection<B> {
    pub(crate) fn open(handler: &Arc<B::Interface>, id: B::BusId) -> Result<Self> {
        let ctx = storage::get_or_create::<B>();
        let key = ctx.connect(handler, &id, false)?;
        Ok(Self { context: Arc::downgrade(&ctx), key, id })
    }

    /// Disconnects the handler. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(ctx) = std::mem::take(&mut self.context).upgrade() {
            ctx.disconnect(self.key);
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.context.upgrade().is_some_and(|ctx| ctx.is_connected(self.key))
    }

    /// The id this handler was connected at.
    #[must_use]
    pub const fn bus_id(&self) -> &B::BusId {
        &self.id
    }

    #[must_use]
    pub const fn key(&self) -> HandlerKey {
        self.key
    }

    /// Leaves the handler connected and gives up the guard.
    ///
    /// Disconnect it later with [`Bus::disconnect_handler`](crate::Bus::disconnect_handler).
    pub fn detach(mut self) -> HandlerKey {
        self.context = Weak::new();
        self.key
    }
}

impl<B: BusTraits> Drop for Connection<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<B: BusTraits> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("bus", &B::name())
            .field("key", &self.key)
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// One handler connected at several ids of an addressed bus.
pub struct MultiConnection<B: BusTraits> {
    handler: Arc<B::Interface>,
    connections: Vec<(B::BusId, HandlerKey, Weak<Context<B>>)>,
}

impl<B: BusTraits> MultiConnection<B> {
    pub fn new(handler: Arc<B::Interface>) -> Self {
        Self { handler, connections: Vec::new() }
    }

    /// Connects the handler at `id`. Already holding `id` is a no-op.
    ///
    /// # Errors
    /// Returns [`EBusError::PolicyViolation`] on a single-address bus, and
    /// [`EBusError::AlreadyConnected`] if the handler is connected to the bus
    /// through a plain [`Connection`].
    pub fn connect(&mut self, id: B::BusId) -> Result<()> {
        if !B::ADDRESS_POLICY.has_id() {
            let err = EBusError::PolicyViolation {
                message: "multi-address connection on a single-address bus".into(),
                context: Some(B::name().into()),
            };
            error!(bus = B::name(), %err, "Connect refused");
            return Err(err);
        }
        if self.is_connected_at(&id) {
            return Ok(());
        }
        self.prune();
        let ctx = storage::get_or_create::<B>();
        let key = ctx.connect(&self.handler, &id, true)?;
        self.connections.push((id, key, Arc::downgrade(&ctx)));
        Ok(())
    }

    /// Disconnects the handler from `id`. Returns false if it was not connected there.
    pub fn disconnect(&mut self, id: &B::BusId) -> bool {
        let Some(at) = self.connections.iter().position(|(held, ..)| held == id) else {
            return false;
        };
        let (_, key, context) = self.connections.remove(at);
        context.upgrade().is_some_and(|ctx| ctx.disconnect(key))
    }

    /// Disconnects the handler from every id. Returns how many were live.
    pub fn disconnect_all(&mut self) -> usize {
        std::mem::take(&mut self.connections)
            .into_iter()
            .filter(|(_, key, context)| context.upgrade().is_some_and(|ctx| ctx.disconnect(*key)))
            .count()
    }

    #[must_use]
    pub fn is_connected_at(&self, id: &B::BusId) -> bool {
        self.connections.iter().any(|(held, key, context)| held == id && is_live(*key, context))
    }

    /// Ids the handler is currently connected at, in connection order.
    pub fn ids(&self) -> impl Iterator<Item = &B::BusId> {
        self.connections
            .iter()
            .filter(|(_, key, context)| is_live(*key, context))
            .map(|(id, ..)| id)
    }

    #[must_use]
    pub const fn handler(&self) -> &Arc<B::Interface> {
        &self.handler
    }

    /// Forgets connections invalidated by a context teardown.
    fn prune(&mut self) {
        self.connections.retain(|(_, key, context)| is_live(*key, context));
    }
}

fn is_live<B: BusTraits>(key: HandlerKey, context: &Weak<Context<B>>) -> bool {
    context.upgrade().is_some_and(|ctx| ctx.is_connected(key))
}

impl<B: BusTraits> Drop for MultiConnection<B> {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

impl<B: BusTraits> fmt::Debug for MultiConnection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiConnection")
            .field("bus", &B::name())
            .field("ids", &self.ids().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
