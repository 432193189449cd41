//! Capabilities the connection manager consumes from a broker transport.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::Result;

/// A stream of inbound deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Opens physical connections to the broker.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Establish a new connection.
    ///
    /// Transient failures must be reported as [`ConnectionError::Socket`](crate::ConnectionError::Socket) or
    /// [`ConnectionError::BrokerUnreachable`](crate::ConnectionError::BrokerUnreachable); any other variant aborts the
    /// connect loop.
    async fn create_connection(&self) -> Result<Arc<dyn BrokerConnection>>;
}

/// One live physical connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Endpoint identity, used for logging.
    fn endpoint(&self) -> &str;

    /// Whether the handle still reports itself open.
    fn is_open(&self) -> bool;

    /// Open a logical channel multiplexed over this connection.
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    /// Attach the sink that receives this connection's failure signals.
    ///
    /// Called once per handle, right after it was established.
    fn register_failure_sink(&self, sink: FailureSink);

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

/// A logical channel used for publishing and consuming.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish raw bytes to an exchange under a routing key.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Make sure messages published with `routing_key` reach `queue`.
    async fn bind_route(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Stop routing `routing_key` to `queue`.
    async fn unbind_route(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Start consuming a queue.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;

    /// Close the channel.
    async fn close(&self) -> Result<()>;
}

/// An inbound message as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Routing key the message was published with (the event name)
    pub routing_key: String,
    /// Raw message body
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Create a new delivery
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }
}

/// Broker-level conditions that make the manager drop and re-establish the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The connection was shut down
    Shutdown,
    /// A transport callback raised an error
    CallbackException,
    /// The broker blocked the connection
    Blocked,
    /// The broker unblocked the connection
    Unblocked,
}

impl FailureKind {
    /// Get the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Shutdown => "shutdown",
            FailureKind::CallbackException => "callback_exception",
            FailureKind::Blocked => "blocked",
            FailureKind::Unblocked => "unblocked",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure signal tagged with the connection it was raised on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureSignal {
    /// What happened
    pub kind: FailureKind,
    /// Connect generation of the handle that raised it
    pub generation: u64,
}

/// Transport-side end of the failure-signal channel.
///
/// Cloneable and non-blocking; notifying after the manager is gone is a no-op.
#[derive(Clone)]
pub struct FailureSink {
    tx: mpsc::UnboundedSender<FailureSignal>,
    generation: u64,
}

impl FailureSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<FailureSignal>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Report a failure on the connection this sink was registered with.
    pub fn notify(&self, kind: FailureKind) {
        let _ = self.tx.send(FailureSignal {
            kind,
            generation: self.generation,
        });
    }

    /// Connect generation this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for FailureSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureSink")
            .field("generation", &self.generation)
            .finish()
    }
}
