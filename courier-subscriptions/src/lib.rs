//! # Courier Subscriptions
//!
//! In-process registry mapping event names to the handler types that must run
//! when an event of that name arrives.
//!
//! - **Identity tokens** - [`EventType`] and [`HandlerType`] identify Rust types at runtime
//! - **Bindings** - [`SubscriptionBinding`] pairs one event type with one handler type
//! - **Registry** - [`SubscriptionRegistry`] keeps bindings per event name in
//!   registration order and reports when an event name loses its last binding
//!
//! ## Example
//!
//! ```rust
//! use courier_subscriptions::SubscriptionRegistry;
//!
//! struct OrderCreated;
//! struct SendEmailHandler;
//!
//! let registry = SubscriptionRegistry::new();
//! registry.on_event_removed(|name| println!("stop routing {name}"));
//!
//! registry.add::<OrderCreated, SendEmailHandler>();
//! registry.remove::<OrderCreated, SendEmailHandler>();
//! assert!(registry.is_empty());
//! ```

pub mod binding;
pub mod error;
pub mod identity;
pub mod registry;

pub use binding::SubscriptionBinding;
pub use error::{Result, SubscriptionError};
pub use identity::{EventType, HandlerType};
pub use registry::{EventRemovedListener, SubscriptionRegistry};
