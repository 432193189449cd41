//! End-to-end event bus tests over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use courier_bus::{
    BusError, Event, EventBus, EventBusConfig, EventHandler, EventMetadata, HandlerCatalog,
    HandlerError, async_trait,
};
use courier_connection::memory::{ConnectOutcome, InMemoryBroker};
use courier_connection::{
    BrokerConnection, ConnectionError, ConnectionManager, FailureKind, ReconnectPolicy,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const EXCHANGE: &str = "courier_event_bus";
const QUEUE: &str = "courier_event_queue";

#[derive(Debug, Serialize, Deserialize)]
struct OrderCreated {
    metadata: EventMetadata,
    order_id: u64,
}

impl OrderCreated {
    fn new(order_id: u64) -> Self {
        Self {
            metadata: EventMetadata::new(),
            order_id,
        }
    }
}

impl Event for OrderCreated {
    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderShipped {
    metadata: EventMetadata,
    order_id: u64,
}

impl Event for OrderShipped {
    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

struct SendEmailHandler(Journal);
struct UpdateInventoryHandler(Journal);

#[async_trait]
impl EventHandler<OrderCreated> for SendEmailHandler {
    async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError> {
        self.0.push(format!("email:{}", event.order_id));
        Ok(())
    }
}

#[async_trait]
impl EventHandler<OrderCreated> for UpdateInventoryHandler {
    async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError> {
        self.0.push(format!("inventory:{}", event.order_id));
        Ok(())
    }
}

struct Harness {
    broker: InMemoryBroker,
    bus: EventBus,
    journal: Journal,
}

fn harness() -> Harness {
    let broker = InMemoryBroker::default();
    let manager = ConnectionManager::new(
        Arc::new(broker.clone()),
        ReconnectPolicy::fixed(Duration::from_millis(10)),
    );

    let journal = Journal::default();
    let catalog = Arc::new(HandlerCatalog::new());
    catalog.register::<OrderCreated, _>(SendEmailHandler(journal.clone()));
    catalog.register::<OrderCreated, _>(UpdateInventoryHandler(journal.clone()));

    let bus = EventBus::with_config(manager, catalog, EventBusConfig::default());
    Harness {
        broker,
        bus,
        journal,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

#[tokio::test]
async fn test_publish_connects_on_demand() {
    let h = harness();
    assert!(!h.bus.connection().is_connected());

    h.bus.publish(&OrderCreated::new(1)).await.unwrap();

    assert!(h.bus.connection().is_connected());
    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, EXCHANGE);
    assert_eq!(published[0].routing_key, "OrderCreated");

    let body: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(body["order_id"], 1);
}

#[tokio::test]
async fn test_publish_fails_when_broker_refuses() {
    let h = harness();
    h.broker.fail_next(1, ConnectOutcome::Refused);

    let result = h.bus.publish(&OrderCreated::new(1)).await;

    assert!(matches!(
        result,
        Err(BusError::Connection(ConnectionError::NotConnected))
    ));
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn test_subscribe_is_dropped_when_broker_refuses() {
    let h = harness();
    h.broker.fail_next(1, ConnectOutcome::Refused);

    let result = h.bus.subscribe::<OrderCreated, SendEmailHandler>().await;

    assert!(matches!(
        result,
        Err(BusError::Connection(ConnectionError::NotConnected))
    ));
    assert!(h.bus.registry().is_empty());
    assert_eq!(h.bus.handler_count::<OrderCreated>(), 0);

    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    assert!(h.broker.is_routed(EXCHANGE, "OrderCreated", QUEUE));
    assert_eq!(h.bus.handler_count::<OrderCreated>(), 1);

    h.bus.unsubscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    assert!(!h.broker.is_routed(EXCHANGE, "OrderCreated", QUEUE));
}

#[tokio::test]
async fn test_concurrent_on_demand_connects_share_one_connection() {
    let h = harness();
    h.broker.fail_next(1, ConnectOutcome::Unreachable);

    let event = OrderCreated::new(1);
    let (consuming, published) = tokio::join!(
        h.bus.start_consuming(),
        h.bus.publish(&event)
    );
    consuming.unwrap();
    published.unwrap();

    assert_eq!(h.broker.connect_attempts(), 2);
    assert_eq!(h.broker.closed_connections(), 0);
    assert!(h.bus.is_consuming());
    assert_eq!(h.broker.consumer_count(QUEUE), 1);

    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    h.bus.publish(&OrderCreated::new(7)).await.unwrap();

    wait_until(|| h.journal.len() == 1).await;
    assert_eq!(h.journal.entries(), vec!["email:7"]);
}

#[tokio::test]
async fn test_consumer_lost_without_failure_signal_is_reported() {
    let h = harness();
    h.bus.start_consuming().await.unwrap();
    assert!(h.bus.is_consuming());

    h.broker.current_connection().unwrap().close().await.unwrap();

    wait_until(|| !h.bus.is_consuming()).await;
    assert_eq!(h.broker.consumer_count(QUEUE), 0);
}

#[tokio::test]
async fn test_published_event_reaches_handlers_in_order() {
    let h = harness();
    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    h.bus.subscribe::<OrderCreated, UpdateInventoryHandler>().await.unwrap();
    h.bus.start_consuming().await.unwrap();

    h.bus.publish(&OrderCreated::new(7)).await.unwrap();

    wait_until(|| h.journal.len() == 2).await;
    assert_eq!(h.journal.entries(), vec!["email:7", "inventory:7"]);
}

#[tokio::test]
async fn test_unsubscribed_event_is_not_routed() {
    let h = harness();
    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();

    let shipped = OrderShipped {
        metadata: EventMetadata::new(),
        order_id: 3,
    };
    h.bus.publish(&shipped).await.unwrap();

    assert!(h.broker.is_routed(EXCHANGE, "OrderCreated", QUEUE));
    assert!(!h.broker.is_routed(EXCHANGE, "OrderShipped", QUEUE));
}

#[tokio::test]
async fn test_route_removed_with_last_handler() {
    let h = harness();
    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    h.bus.subscribe::<OrderCreated, UpdateInventoryHandler>().await.unwrap();
    assert_eq!(h.broker.routing_keys(EXCHANGE), vec!["OrderCreated"]);

    h.bus.unsubscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    assert!(h.broker.is_routed(EXCHANGE, "OrderCreated", QUEUE));
    assert_eq!(h.bus.handler_count::<OrderCreated>(), 1);

    h.bus.unsubscribe::<OrderCreated, UpdateInventoryHandler>().await.unwrap();
    assert!(!h.broker.is_routed(EXCHANGE, "OrderCreated", QUEUE));
    assert!(h.bus.registry().is_empty());

    // Unsubscribing again is a no-op
    h.bus.unsubscribe::<OrderCreated, UpdateInventoryHandler>().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_restores_routes_and_consumer() {
    let h = harness();
    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    h.bus.start_consuming().await.unwrap();
    assert_eq!(h.broker.consumer_count(QUEUE), 1);

    h.broker.drop_routes();
    h.broker
        .current_connection()
        .unwrap()
        .sever(FailureKind::Shutdown);
    assert_eq!(h.broker.consumer_count(QUEUE), 0);

    wait_until(|| {
        h.broker.is_routed(EXCHANGE, "OrderCreated", QUEUE) && h.broker.consumer_count(QUEUE) == 1
    })
    .await;
    assert_eq!(h.broker.connect_attempts(), 2);

    h.bus.publish(&OrderCreated::new(11)).await.unwrap();
    wait_until(|| h.journal.len() == 1).await;
    assert_eq!(h.journal.entries(), vec!["email:11"]);
}

#[tokio::test]
async fn test_close_disposes_connection() {
    let h = harness();
    h.bus.subscribe::<OrderCreated, SendEmailHandler>().await.unwrap();
    h.bus.start_consuming().await.unwrap();

    h.bus.close().await;

    assert!(!h.bus.is_consuming());
    assert!(!h.bus.connection().is_connected());
    assert_eq!(h.broker.open_connections(), 0);

    let result = h.bus.publish(&OrderCreated::new(1)).await;
    assert!(matches!(
        result,
        Err(BusError::Connection(ConnectionError::Disposed))
    ));
}
