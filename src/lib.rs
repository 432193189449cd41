// Courier - a resilient event-bus client
//
// A self-healing broker connection, an in-process subscription registry and a
// broker-backed event bus that ties the two together.

// Re-export member crates
pub use courier_bus;
pub use courier_connection;
pub use courier_subscriptions;

#[cfg(feature = "log")]
pub use courier_log;

// Re-export the most used types at the crate root
pub use courier_bus::{
    BusError, DynEventHandler, Event, EventBus, EventBusBuilder, EventBusConfig, EventHandler,
    EventMetadata, HandlerCatalog, HandlerError, HandlerProvider, TypedEventHandler,
};
pub use courier_connection::{
    BackoffStrategy, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
    ReconnectPolicy,
};
pub use courier_subscriptions::{
    EventType, HandlerType, SubscriptionBinding, SubscriptionError, SubscriptionRegistry,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        BusError,
        ConnectionConfig,
        ConnectionManager,
        Event,
        EventBus,
        EventBusBuilder,
        EventHandler,
        EventMetadata,
        HandlerCatalog,
        HandlerError,
        ReconnectPolicy,
    };
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
}
