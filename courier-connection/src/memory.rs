//! In-process broker transport.
//!
//! Implements the transport traits without any network I/O. Connect outcomes
//! can be scripted and failure signals raised on demand, which makes it the
//! transport of choice for tests and local development.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use courier_connection::memory::InMemoryBroker;
//! use courier_connection::{ConnectionManager, ReconnectPolicy};
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryBroker::new("memory://orders");
//! let manager = ConnectionManager::new(Arc::new(broker.clone()), ReconnectPolicy::fixed(Duration::from_millis(10)));
//!
//! assert!(manager.try_connect().await);
//! assert_eq!(broker.open_connections(), 1);
//! manager.dispose().await;
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::{ConnectionError, Result};
use crate::transport::{
    BrokerChannel, BrokerConnection, ConnectionFactory, Delivery, DeliveryStream, FailureKind,
    FailureSink,
};

/// Scripted result of one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Hand out a fresh open connection
    Accept,
    /// Fail with [`ConnectionError::BrokerUnreachable`] (retried)
    Unreachable,
    /// Fail with [`ConnectionError::Authentication`] (not retried)
    Refused,
}

/// A message recorded by [`InMemoryBroker::published`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Target exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Raw body
    pub payload: Vec<u8>,
}

struct Consumer {
    connection_open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Result<Delivery>>,
}

impl Consumer {
    fn is_live(&self) -> bool {
        self.connection_open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Delivery>,
    consumers: Vec<Consumer>,
}

impl QueueState {
    fn enqueue(&mut self, delivery: Delivery) {
        self.prune();
        for consumer in &self.consumers {
            if consumer.tx.send(Ok(delivery.clone())).is_ok() {
                return;
            }
        }
        self.backlog.push_back(delivery);
    }

    // Dropping a consumer's sender ends its delivery stream.
    fn prune(&mut self) {
        self.consumers.retain(Consumer::is_live);
    }
}

struct BrokerState {
    endpoint: String,
    script: Mutex<VecDeque<ConnectOutcome>>,
    attempts: AtomicUsize,
    accepted: AtomicUsize,
    closed: AtomicUsize,
    connect_delay: Mutex<Duration>,
    fail_close: AtomicBool,
    connections: Mutex<Vec<Weak<InMemoryConnection>>>,
    // exchange -> routing key -> queues
    routes: Mutex<HashMap<String, HashMap<String, Vec<String>>>>,
    queues: Mutex<HashMap<String, QueueState>>,
    published: Mutex<Vec<PublishedMessage>>,
}

/// In-process broker; cheap to clone, all clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create a broker identified by `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BrokerState {
                endpoint: endpoint.into(),
                script: Mutex::new(VecDeque::new()),
                attempts: AtomicUsize::new(0),
                accepted: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
                fail_close: AtomicBool::new(false),
                connections: Mutex::new(Vec::new()),
                routes: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue outcomes for the next connect attempts; once drained, attempts succeed.
    pub fn script<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = ConnectOutcome>,
    {
        self.state.script.lock().extend(outcomes);
    }

    /// Make the next `count` connect attempts fail with `outcome`.
    pub fn fail_next(&self, count: usize, outcome: ConnectOutcome) {
        self.script(std::iter::repeat_n(outcome, count));
    }

    /// Make closing a connection fail with a socket error.
    pub fn fail_on_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Make every connect attempt take `delay` before its outcome is decided.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Number of connections handed out so far
    pub fn accepted_connections(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Number of `close` calls received on handed-out connections
    pub fn closed_connections(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Number of connect attempts seen so far
    pub fn connect_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Number of handed-out connections that are still open
    pub fn open_connections(&self) -> usize {
        self.live_connections()
            .iter()
            .filter(|c| c.is_open())
            .count()
    }

    /// Most recently handed-out connection that is still open
    pub fn current_connection(&self) -> Option<Arc<InMemoryConnection>> {
        self.live_connections()
            .into_iter()
            .rev()
            .find(|c| c.is_open())
    }

    /// Raise a failure signal on the current connection.
    ///
    /// Returns `false` if there is no open connection.
    pub fn raise(&self, kind: FailureKind) -> bool {
        match self.current_connection() {
            Some(connection) => {
                connection.raise(kind);
                true
            }
            None => false,
        }
    }

    /// Whether `routing_key` on `exchange` reaches `queue`
    pub fn is_routed(&self, exchange: &str, routing_key: &str, queue: &str) -> bool {
        self.state
            .routes
            .lock()
            .get(exchange)
            .and_then(|keys| keys.get(routing_key))
            .is_some_and(|queues| queues.iter().any(|q| q == queue))
    }

    /// Routing keys bound on `exchange`
    pub fn routing_keys(&self, exchange: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .routes
            .lock()
            .get(exchange)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Every message published so far
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().clone()
    }

    /// Forget every route binding, as a broker restart without durable
    /// bindings would.
    pub fn drop_routes(&self) {
        self.state.routes.lock().clear();
    }

    /// Number of live consumers on `queue`
    pub fn consumer_count(&self, queue: &str) -> usize {
        let mut queues = self.state.queues.lock();
        match queues.get_mut(queue) {
            Some(state) => {
                state.prune();
                state.consumers.len()
            }
            None => 0,
        }
    }

    /// Push a delivery straight into `queue`.
    pub fn deliver(&self, queue: &str, delivery: Delivery) {
        self.state
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .enqueue(delivery);
    }

    fn live_connections(&self) -> Vec<Arc<InMemoryConnection>> {
        let mut connections = self.state.connections.lock();
        connections.retain(|c| c.strong_count() > 0);
        connections.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new("memory://localhost")
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("endpoint", &self.state.endpoint)
            .field("connect_attempts", &self.connect_attempts())
            .finish()
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryBroker {
    async fn create_connection(&self) -> Result<Arc<dyn BrokerConnection>> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);

        match outcome {
            ConnectOutcome::Accept => {
                self.state.accepted.fetch_add(1, Ordering::SeqCst);
                let connection = Arc::new(InMemoryConnection {
                    endpoint: self.state.endpoint.clone(),
                    open: Arc::new(AtomicBool::new(true)),
                    sink: Mutex::new(None),
                    broker: self.state.clone(),
                });
                self.state
                    .connections
                    .lock()
                    .push(Arc::downgrade(&connection));
                debug!(endpoint = %self.state.endpoint, "In-memory connection opened");
                Ok(connection)
            }
            ConnectOutcome::Unreachable => Err(ConnectionError::BrokerUnreachable(format!(
                "{} is not accepting connections",
                self.state.endpoint
            ))),
            ConnectOutcome::Refused => Err(ConnectionError::Authentication(format!(
                "{} refused the credentials",
                self.state.endpoint
            ))),
        }
    }
}

/// Connection handed out by [`InMemoryBroker`].
pub struct InMemoryConnection {
    endpoint: String,
    open: Arc<AtomicBool>,
    sink: Mutex<Option<FailureSink>>,
    broker: Arc<BrokerState>,
}

impl InMemoryConnection {
    /// Raise a failure signal without closing the connection.
    pub fn raise(&self, kind: FailureKind) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.notify(kind);
        }
    }

    /// Close the connection from the broker side, then raise `kind`.
    pub fn sever(&self, kind: FailureKind) {
        self.shut();
        self.raise(kind);
    }

    fn shut(&self) {
        self.open.store(false, Ordering::SeqCst);
        for queue in self.broker.queues.lock().values_mut() {
            queue.prune();
        }
    }

    /// Whether a failure sink was attached
    pub fn has_failure_sink(&self) -> bool {
        self.sink.lock().is_some()
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(ConnectionError::Channel("connection is closed".to_string()));
        }
        Ok(Box::new(InMemoryChannel {
            broker: self.broker.clone(),
            connection_open: self.open.clone(),
            open: AtomicBool::new(true),
        }))
    }

    fn register_failure_sink(&self, sink: FailureSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn close(&self) -> Result<()> {
        self.broker.closed.fetch_add(1, Ordering::SeqCst);
        self.shut();
        if self.broker.fail_close.load(Ordering::SeqCst) {
            return Err(ConnectionError::Socket(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection reset while closing",
            )));
        }
        Ok(())
    }
}

struct InMemoryChannel {
    broker: Arc<BrokerState>,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::Channel("channel is closed".to_string()))
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;

        self.broker.published.lock().push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });

        let targets: Vec<String> = self
            .broker
            .routes
            .lock()
            .get(exchange)
            .and_then(|keys| keys.get(routing_key))
            .cloned()
            .unwrap_or_default();

        let mut queues = self.broker.queues.lock();
        for queue in targets {
            queues
                .entry(queue)
                .or_default()
                .enqueue(Delivery::new(routing_key, payload));
        }
        Ok(())
    }

    async fn bind_route(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_open()?;

        let mut routes = self.broker.routes.lock();
        let queues = routes
            .entry(exchange.to_string())
            .or_default()
            .entry(routing_key.to_string())
            .or_default();
        if !queues.iter().any(|q| q == queue) {
            queues.push(queue.to_string());
        }
        Ok(())
    }

    async fn unbind_route(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_open()?;

        let mut routes = self.broker.routes.lock();
        if let Some(keys) = routes.get_mut(exchange) {
            if let Some(queues) = keys.get_mut(routing_key) {
                queues.retain(|q| q != queue);
                if queues.is_empty() {
                    keys.remove(routing_key);
                }
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut queues = self.broker.queues.lock();
        let state = queues.entry(queue.to_string()).or_default();
        while let Some(delivery) = state.backlog.pop_front() {
            let _ = tx.send(Ok(delivery));
        }
        state.consumers.push(Consumer {
            connection_open: self.connection_open.clone(),
            tx,
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let broker = InMemoryBroker::default();
        broker.script([ConnectOutcome::Unreachable, ConnectOutcome::Refused]);

        let first = broker.create_connection().await;
        assert!(matches!(first, Err(ConnectionError::BrokerUnreachable(_))));

        let second = broker.create_connection().await;
        assert!(matches!(second, Err(ConnectionError::Authentication(_))));

        assert!(broker.create_connection().await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_publish_reaches_bound_queue() {
        let broker = InMemoryBroker::default();
        let connection = broker.create_connection().await.unwrap();
        let channel = connection.create_channel().await.unwrap();

        channel.bind_route("orders", "events", "OrderCreated").await.unwrap();
        let mut deliveries = channel.consume("orders").await.unwrap();

        channel.publish("events", "OrderCreated", b"{}").await.unwrap();
        channel.publish("events", "OrderShipped", b"{}").await.unwrap();

        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.routing_key, "OrderCreated");
        assert_eq!(broker.published().len(), 2);
        assert!(broker.is_routed("events", "OrderCreated", "orders"));
        assert!(!broker.is_routed("events", "OrderShipped", "orders"));
    }

    #[tokio::test]
    async fn test_backlog_flushed_to_late_consumer() {
        let broker = InMemoryBroker::default();
        broker.deliver("orders", Delivery::new("OrderCreated", b"1".to_vec()));
        broker.deliver("orders", Delivery::new("OrderCreated", b"2".to_vec()));

        let connection = broker.create_connection().await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        let mut deliveries = channel.consume("orders").await.unwrap();

        assert_eq!(deliveries.next().await.unwrap().unwrap().payload, b"1");
        assert_eq!(deliveries.next().await.unwrap().unwrap().payload, b"2");
    }

    #[tokio::test]
    async fn test_unbind_removes_route() {
        let broker = InMemoryBroker::default();
        let connection = broker.create_connection().await.unwrap();
        let channel = connection.create_channel().await.unwrap();

        channel.bind_route("orders", "events", "OrderCreated").await.unwrap();
        channel.unbind_route("orders", "events", "OrderCreated").await.unwrap();

        assert!(broker.routing_keys("events").is_empty());
    }

    #[tokio::test]
    async fn test_severed_connection_ends_consumer_stream() {
        let broker = InMemoryBroker::default();
        let connection = broker.create_connection().await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        let mut deliveries = channel.consume("orders").await.unwrap();
        assert_eq!(broker.consumer_count("orders"), 1);

        broker.current_connection().unwrap().sever(FailureKind::Shutdown);

        assert_eq!(broker.consumer_count("orders"), 0);
        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_routes() {
        let broker = InMemoryBroker::default();
        let connection = broker.create_connection().await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel.bind_route("orders", "events", "OrderCreated").await.unwrap();

        broker.drop_routes();

        assert!(!broker.is_routed("events", "OrderCreated", "orders"));
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_channels() {
        let broker = InMemoryBroker::default();
        let connection = broker.create_connection().await.unwrap();
        connection.close().await.unwrap();

        assert!(connection.create_channel().await.is_err());
        assert_eq!(broker.open_connections(), 0);
    }
}
