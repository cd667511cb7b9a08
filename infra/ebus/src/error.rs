use std::borrow::Cow;

/// Contract violations reported by the bus.
///
/// Every variant is also logged at `error` level when it is produced, and the
/// offending operation leaves the bus untouched.
#[mhub_derive::mhub_error]
pub enum EBusError {
    /// The handler allocation is already connected to this bus.
    #[error("Handler already connected{}: {message}", format_context(.context))]
    AlreadyConnected { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A `HandlerPolicy::Single` address already has a handler.
    #[error("Address occupied{}: {message}", format_context(.context))]
    AddressOccupied { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The router allocation is already registered on this bus.
    #[error("Router already connected{}: {message}", format_context(.context))]
    RouterAlreadyConnected { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The request does not make sense for the bus declaration.
    #[error("Policy violation{}: {message}", format_context(.context))]
    PolicyViolation { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

/// Result type alias for bus operations that can be refused.
pub type Result<T> = std::result::Result<T, EBusError>;
