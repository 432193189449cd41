//! Broker-backed event bus for Courier
//!
//! This crate connects the persistent broker connection from
//! `courier-connection` with the subscription registry from
//! `courier-subscriptions`.
//!
//! ## Features
//!
//! - **Publish** - events are serialized to JSON and routed by event name
//! - **Subscribe** - handler types are registered per event type; routes are
//!   bound and unbound on the broker as subscriptions come and go
//! - **Dispatch** - inbound messages run their handlers sequentially, in
//!   registration order
//! - **Resilient** - routes and the consumer are restored after a reconnect
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_bus::{
//!     BusError, Event, EventBusBuilder, EventHandler, EventMetadata, HandlerCatalog,
//!     HandlerError, async_trait,
//! };
//! use serde::{Deserialize, Serialize};
//! use courier_connection::{ConnectionManager, ReconnectPolicy};
//! use courier_connection::memory::InMemoryBroker;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct OrderCreated {
//!     metadata: EventMetadata,
//!     order_id: u64,
//! }
//!
//! impl Event for OrderCreated {
//!     fn metadata(&self) -> &EventMetadata { &self.metadata }
//! }
//!
//! struct SendEmailHandler;
//!
//! #[async_trait]
//! impl EventHandler<OrderCreated> for SendEmailHandler {
//!     async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError> {
//!         println!("Sending confirmation for order {}", event.order_id);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BusError> {
//!     let manager = ConnectionManager::new(
//!         Arc::new(InMemoryBroker::default()),
//!         ReconnectPolicy::default(),
//!     );
//!
//!     let handlers = Arc::new(HandlerCatalog::new());
//!     handlers.register::<OrderCreated, _>(SendEmailHandler);
//!
//!     let bus = EventBusBuilder::new(manager, handlers)
//!         .queue("orders")
//!         .build();
//!
//!     bus.subscribe::<OrderCreated, SendEmailHandler>().await?;
//!     bus.start_consuming().await?;
//!
//!     bus.publish(&OrderCreated { metadata: EventMetadata::new(), order_id: 42 }).await?;
//!
//!     bus.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,ignore
//! match bus.dispatch("OrderCreated", &payload).await {
//!     Ok(()) => println!("All handlers succeeded"),
//!     Err(BusError::HandlersFailed(errors)) => {
//!         eprintln!("Some handlers failed: {:?}", errors);
//!     }
//!     Err(e) => eprintln!("Dispatch error: {}", e),
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;

pub use async_trait::async_trait;
pub use bus::{EventBus, EventBusBuilder};
pub use config::EventBusConfig;
pub use error::{BusError, HandlerError, Result};
pub use event::{Event, EventMetadata};
pub use handler::{DynEventHandler, EventHandler, HandlerCatalog, HandlerProvider, TypedEventHandler};
