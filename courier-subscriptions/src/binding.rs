use crate::identity::{EventType, HandlerType};

/// A registered pairing of one event type with one handler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionBinding {
    /// Event the handler reacts to
    pub event_type: EventType,
    /// Handler to run
    pub handler_type: HandlerType,
}

impl SubscriptionBinding {
    /// Pair `event_type` with `handler_type`
    pub fn new(event_type: EventType, handler_type: HandlerType) -> Self {
        Self {
            event_type,
            handler_type,
        }
    }

    /// Binding for the Rust types `E` and `H`
    pub fn of<E: ?Sized + 'static, H: ?Sized + 'static>() -> Self {
        Self::new(EventType::of::<E>(), HandlerType::of::<H>())
    }

    /// Canonical name of the bound event
    pub fn event_name(&self) -> &'static str {
        self.event_type.name()
    }
}
