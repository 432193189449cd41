//! RabbitMQ transport over `lapin`

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind, options::*,
    types::FieldTable,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};
use crate::transport::{
    BrokerChannel, BrokerConnection, ConnectionFactory, Delivery, DeliveryStream, FailureKind,
    FailureSink,
};

/// Opens AMQP connections to RabbitMQ
#[derive(Debug, Clone)]
pub struct RabbitMqConnectionFactory {
    config: ConnectionConfig,
}

impl RabbitMqConnectionFactory {
    /// Create a factory for the configured broker
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for RabbitMqConnectionFactory {
    async fn create_connection(&self) -> Result<Arc<dyn BrokerConnection>> {
        debug!(url = %redact(&self.config.url), "Connecting to RabbitMQ");

        let mut properties = ConnectionProperties::default();
        if let Some(name) = &self.config.connection_name {
            properties = properties.with_connection_name(name.clone().into());
        }

        let connection = Connection::connect(&self.config.url, properties)
            .await
            .map_err(ConnectionError::from)?;

        Ok(Arc::new(RabbitMqConnection {
            endpoint: redact(&self.config.url),
            connection,
            sink: Arc::new(Mutex::new(None)),
        }))
    }
}

/// A live AMQP connection
pub struct RabbitMqConnection {
    endpoint: String,
    connection: Connection,
    sink: Arc<Mutex<Option<FailureSink>>>,
}

#[async_trait]
impl BrokerConnection for RabbitMqConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Box::new(RabbitMqChannel { channel }))
    }

    fn register_failure_sink(&self, sink: FailureSink) {
        *self.sink.lock() = Some(sink);

        let slot = self.sink.clone();
        self.connection.on_error(move |err| {
            warn!(error = %err, "RabbitMQ connection reported an error");
            if let Some(sink) = slot.lock().as_ref() {
                sink.notify(FailureKind::Shutdown);
            }
        });
    }

    async fn close(&self) -> Result<()> {
        self.sink.lock().take();
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(200, "Normal shutdown")
            .await
            .map_err(|e| ConnectionError::Socket(std::io::Error::other(e.to_string())))
    }
}

struct RabbitMqChannel {
    channel: Channel,
}

impl RabbitMqChannel {
    async fn declare(&self, queue: &str, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for RabbitMqChannel {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let props = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into());

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                props,
            )
            .await
            .map_err(|e| ConnectionError::Publish(e.to_string()))?;

        debug!(exchange, routing_key, "Published message");
        Ok(())
    }

    async fn bind_route(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.declare(queue, exchange).await?;
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(queue, exchange, routing_key, "Queue bound to exchange");
        Ok(())
    }

    async fn unbind_route(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_unbind(queue, exchange, routing_key, FieldTable::default())
            .await?;
        debug!(queue, exchange, routing_key, "Queue unbound from exchange");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let consumer_tag = format!("courier-{}", uuid::Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConnectionError::Consume(e.to_string()))?;

        info!(queue, consumer_tag = %consumer_tag, "Consuming queue");

        let stream = consumer.map(|delivery| {
            delivery
                .map(|d| Delivery::new(d.routing_key.to_string(), d.data))
                .map_err(|e| ConnectionError::Consume(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        self.channel
            .close(200, "Normal shutdown")
            .await
            .map_err(|e| ConnectionError::Channel(e.to_string()))
    }
}

/// Strip credentials from an AMQP URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}{}", &url[..scheme + 3], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
