//! # Courier Connection
//!
//! Keeps a single logical broker connection alive across network failures.
//!
//! - **ConnectionManager** - owns the live handle, connects under a
//!   [`ReconnectPolicy`] and reconnects when the transport reports a failure
//! - **Transport traits** - [`ConnectionFactory`], [`BrokerConnection`] and
//!   [`BrokerChannel`] abstract the broker client library
//! - **In-memory transport** - [`memory::InMemoryBroker`] for tests and local runs
//!
//! ## Features
//!
//! - `rabbitmq` - RabbitMQ/AMQP transport via `lapin`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_connection::{ConnectionConfig, ConnectionManager};
//! use courier_connection::rabbitmq::RabbitMqConnectionFactory;
//!
//! let config = ConnectionConfig::from_env()?;
//! let factory = Arc::new(RabbitMqConnectionFactory::new(config.clone()));
//! let manager = ConnectionManager::from_config(factory, &config);
//!
//! manager.on_reconnected(|| tracing::info!("broker is back"));
//!
//! if manager.try_connect().await {
//!     let channel = manager.create_channel().await?;
//!     channel.publish("events", "OrderCreated", br#"{"id":1}"#).await?;
//! }
//!
//! manager.dispose().await;
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod policy;
pub mod transport;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

pub use config::{BackoffKind, ConnectionConfig};
pub use error::{ConnectionError, Result};
pub use manager::{ConnectionManager, ConnectionState, ReconnectListener};
pub use policy::{BackoffStrategy, ReconnectPolicy};
pub use transport::{
    BrokerChannel, BrokerConnection, ConnectionFactory, Delivery, DeliveryStream, FailureKind,
    FailureSignal, FailureSink,
};
