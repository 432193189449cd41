//! Broker-backed event bus

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use courier_connection::{BrokerChannel, ConnectionManager};
use courier_subscriptions::{EventType, HandlerType, SubscriptionRegistry};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EventBusConfig;
use crate::error::{BusError, Result};
use crate::event::Event;
use crate::handler::{EventHandler, HandlerProvider};

/// Event bus publishing to and consuming from a message broker.
///
/// Publishing and route management go through the shared
/// [`ConnectionManager`]; subscriptions are tracked in a
/// [`SubscriptionRegistry`] owned by the bus. Cloning is cheap and clones share
/// all state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    connection: Arc<ConnectionManager>,
    registry: SubscriptionRegistry,
    handlers: Arc<dyn HandlerProvider>,
    config: EventBusConfig,
    /// Event names whose last binding was removed, fed by the registry
    removed: Mutex<mpsc::UnboundedReceiver<String>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    consuming: AtomicBool,
}

impl EventBus {
    /// Create an event bus with the default configuration
    pub fn new(connection: Arc<ConnectionManager>, handlers: Arc<dyn HandlerProvider>) -> Self {
        Self::with_config(connection, handlers, EventBusConfig::default())
    }

    /// Create event bus with custom config
    pub fn with_config(
        connection: Arc<ConnectionManager>,
        handlers: Arc<dyn HandlerProvider>,
        config: EventBusConfig,
    ) -> Self {
        let registry = SubscriptionRegistry::new();
        let (removed_tx, removed_rx) = mpsc::unbounded_channel();
        registry.on_event_removed(move |event_name| {
            let _ = removed_tx.send(event_name.to_string());
        });

        let inner = Arc::new(BusInner {
            connection,
            registry,
            handlers,
            config,
            removed: Mutex::new(removed_rx),
            consumer: Mutex::new(None),
            consuming: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .connection
            .on_reconnected(move || BusInner::schedule_resync(&weak));

        Self { inner }
    }

    /// Publish an event
    ///
    /// Connects first if no connection is live. The event is serialized to
    /// JSON and published with its event name as the routing key.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// bus.publish(&OrderCreated::new(42)).await?;
    /// ```
    pub async fn publish<E: Event>(&self, event: &E) -> Result<()> {
        let event_name = self.inner.event_name::<E>();
        let payload =
            serde_json::to_vec(event).map_err(|e| BusError::Serialization(e.to_string()))?;

        let channel = self.inner.open_channel().await?;
        let result = channel
            .publish(&self.inner.config.exchange, event_name, &payload)
            .await;
        close_channel(channel).await;
        result?;

        info!(event = event_name, event_id = %event.event_id(), "Published event");
        Ok(())
    }

    /// Subscribe handler type `H` to events of type `E`
    ///
    /// The handler instance is resolved through the bus's
    /// [`HandlerProvider`] when a message arrives. The route for the event
    /// name is bound on every call; binding is idempotent on the broker.
    ///
    /// If binding fails, a subscription added by this call is removed again
    /// before the error is returned.
    pub async fn subscribe<E, H>(&self) -> Result<()>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let event_type = EventType::of::<E>();
        let handler_type = HandlerType::of::<H>();
        let event_name = self.inner.registry.event_identifier(event_type);

        let added = self.inner.registry.add_subscription(event_type, handler_type);
        if added {
            info!(
                event = event_name,
                handler = handler_type.name(),
                "Subscribing to event"
            );
        }

        if let Err(e) = self.inner.bind(event_name).await {
            if added {
                self.inner.registry.remove_subscription(event_type, handler_type);
            }
            error!(
                event = event_name,
                handler = handler_type.name(),
                error = %e,
                "Failed to bind route, subscription dropped"
            );
            return Err(e);
        }
        Ok(())
    }

    /// Unsubscribe handler type `H` from events of type `E`
    ///
    /// When this removes the last handler for the event name, the route is
    /// unbound so the broker stops delivering it to this client.
    pub async fn unsubscribe<E, H>(&self) -> Result<()>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let event_type = EventType::of::<E>();
        let handler_type = HandlerType::of::<H>();

        if !self.inner.registry.remove_subscription(event_type, handler_type) {
            return Ok(());
        }
        info!(
            event = self.inner.registry.event_identifier(event_type),
            handler = handler_type.name(),
            "Unsubscribed from event"
        );

        let mut removed: Vec<String> = {
            let mut rx = self.inner.removed.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        removed.sort();
        removed.dedup();

        let mut first_error = None;
        for event_name in removed {
            if self.inner.registry.has_subscriptions_for_event(&event_name) {
                continue;
            }
            if let Err(e) = self.inner.unbind(&event_name).await {
                error!(event = %event_name, error = %e, "Failed to unbind route");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run every handler registered for `event_name` against `payload`
    ///
    /// Handlers run one after another in registration order. Unknown event
    /// names are ignored.
    pub async fn dispatch(&self, event_name: &str, payload: &[u8]) -> Result<()> {
        self.inner.dispatch(event_name, payload).await
    }

    /// Start consuming the configured queue in a background task
    ///
    /// Replaces a consumer that is already running.
    pub async fn start_consuming(&self) -> Result<()> {
        self.inner.start_consumer().await
    }

    /// Whether a consumer is running
    ///
    /// Turns false when the delivery stream ends, e.g. because its connection
    /// closed. A consumer lost to a broker failure is restarted after the
    /// reconnect.
    pub fn is_consuming(&self) -> bool {
        self.inner.consuming.load(Ordering::SeqCst)
            && self
                .inner
                .consumer
                .lock()
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Event type registered under `event_name`
    pub fn event_type(&self, event_name: &str) -> Result<EventType> {
        Ok(self.inner.registry.event_type_by_name(event_name)?)
    }

    /// Get handler count for an event type
    pub fn handler_count<E: Event>(&self) -> usize {
        self.inner
            .registry
            .handlers_for_event(self.inner.event_name::<E>())
            .len()
    }

    /// The subscription registry
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// The connection manager
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    /// The bus configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Stop consuming and dispose the connection manager
    pub async fn close(&self) {
        self.inner.consuming.store(false, Ordering::SeqCst);
        if let Some(consumer) = self.inner.consumer.lock().take() {
            consumer.abort();
        }
        self.inner.connection.dispose().await;
        info!("Event bus closed");
    }
}

impl BusInner {
    fn event_name<E: Event>(&self) -> &'static str {
        self.registry.event_identifier(EventType::of::<E>())
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        if !self.connection.ensure_connected().await {
            warn!("Broker is not reachable");
        }
        Ok(self.connection.create_channel().await?)
    }

    async fn bind(&self, event_name: &str) -> Result<()> {
        let channel = self.open_channel().await?;
        let result = channel
            .bind_route(&self.config.queue, &self.config.exchange, event_name)
            .await;
        close_channel(channel).await;
        result?;

        debug!(
            event = event_name,
            queue = %self.config.queue,
            exchange = %self.config.exchange,
            "Route bound"
        );
        Ok(())
    }

    async fn unbind(&self, event_name: &str) -> Result<()> {
        let channel = self.open_channel().await?;
        let result = channel
            .unbind_route(&self.config.queue, &self.config.exchange, event_name)
            .await;
        close_channel(channel).await;
        result?;

        debug!(
            event = event_name,
            queue = %self.config.queue,
            exchange = %self.config.exchange,
            "Route unbound"
        );
        Ok(())
    }

    async fn dispatch(&self, event_name: &str, payload: &[u8]) -> Result<()> {
        let bindings = self.registry.handlers_for_event(event_name);
        if bindings.is_empty() {
            debug!(event = event_name, "No subscription for event, ignoring");
            return Ok(());
        }

        serde_json::from_slice::<serde::de::IgnoredAny>(payload).map_err(|e| {
            BusError::Deserialization {
                event: event_name.to_string(),
                reason: e.to_string(),
            }
        })?;

        let handlers = bindings
            .iter()
            .map(|binding| {
                self.handlers
                    .resolve(binding)
                    .ok_or_else(|| BusError::HandlerNotResolved {
                        event: event_name.to_string(),
                        handler: binding.handler_type.name().to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut errors = Vec::new();
        for handler in &handlers {
            if let Err(e) = handler.handle_payload(payload).await {
                error!(
                    event = event_name,
                    handler = handler.handler_type().name(),
                    error = %e,
                    "Handler failed"
                );
                errors.push(e);
                if !self.config.continue_on_error {
                    break;
                }
            }
        }

        if !errors.is_empty() {
            return Err(BusError::HandlersFailed(errors));
        }

        debug!(event = event_name, handlers = handlers.len(), "Event dispatched");
        Ok(())
    }

    async fn start_consumer(self: &Arc<Self>) -> Result<()> {
        let channel = self.open_channel().await?;
        let mut deliveries = match channel.consume(&self.config.queue).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                close_channel(channel).await;
                return Err(e.into());
            }
        };

        let bus = Arc::downgrade(self);
        let queue = self.config.queue.clone();
        let task = tokio::spawn(async move {
            let _channel = channel;
            while let Some(delivery) = deliveries.next().await {
                let Some(bus) = bus.upgrade() else {
                    break;
                };
                match delivery {
                    Ok(delivery) => {
                        if let Err(e) = bus.dispatch(&delivery.routing_key, &delivery.payload).await
                        {
                            error!(
                                event = %delivery.routing_key,
                                error = %e,
                                "Failed to process event"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "Consumer stream failed");
                        break;
                    }
                }
            }
            warn!(queue = %queue, "Consumer stopped");
        });

        self.consuming.store(true, Ordering::SeqCst);
        if let Some(previous) = self.consumer.lock().replace(task) {
            previous.abort();
        }

        info!(queue = %self.config.queue, "Consuming events");
        Ok(())
    }

    fn schedule_resync(this: &Weak<Self>) {
        let Some(inner) = this.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(inner.resync());
            }
            Err(_) => warn!("No async runtime available to restore routes after reconnect"),
        }
    }

    async fn resync(self: Arc<Self>) {
        let event_names: Vec<String> = self.registry.all_subscriptions().into_keys().collect();
        info!(events = event_names.len(), "Broker reconnected, restoring event routes");

        for event_name in &event_names {
            if let Err(e) = self.bind(event_name).await {
                error!(event = %event_name, error = %e, "Failed to restore route");
            }
        }

        if self.consuming.load(Ordering::SeqCst) {
            if let Err(e) = self.start_consumer().await {
                error!(error = %e, "Failed to restart consumer after reconnect");
            }
        }
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.get_mut().take() {
            consumer.abort();
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("consuming", &self.is_consuming())
            .finish()
    }
}

async fn close_channel(channel: Box<dyn BrokerChannel>) {
    if let Err(e) = channel.close().await {
        debug!(error = %e, "Failed to close channel");
    }
}

/// Event bus builder
pub struct EventBusBuilder {
    connection: Arc<ConnectionManager>,
    handlers: Arc<dyn HandlerProvider>,
    config: EventBusConfig,
}

impl EventBusBuilder {
    /// Create new event bus builder
    pub fn new(connection: Arc<ConnectionManager>, handlers: Arc<dyn HandlerProvider>) -> Self {
        Self {
            connection,
            handlers,
            config: EventBusConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Exchange to publish to
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.exchange = exchange.into();
        self
    }

    /// Queue to consume from
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.config.queue = queue.into();
        self
    }

    /// Enable/disable continue on error
    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.config.continue_on_error = enabled;
        self
    }

    /// Build the event bus
    pub fn build(self) -> EventBus {
        EventBus::with_config(self.connection, self.handlers, self.config)
    }
}
