//! Event bus configuration

use serde::{Deserialize, Serialize};

/// Default exchange events are published to
pub const DEFAULT_EXCHANGE: &str = "courier_event_bus";

/// Default queue this client consumes from
pub const DEFAULT_QUEUE: &str = "courier_event_queue";

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Exchange events are published to and routes are bound on
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Queue bound to the exchange and consumed by this client
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Continue running the remaining handlers after one fails
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_exchange() -> String {
    DEFAULT_EXCHANGE.to_string()
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_continue_on_error() -> bool {
    true
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            queue: default_queue(),
            continue_on_error: default_continue_on_error(),
        }
    }
}

impl EventBusConfig {
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.exchange, "courier_event_bus");
        assert_eq!(config.queue, "courier_event_queue");
        assert!(config.continue_on_error);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EventBusConfig = serde_json::from_str(r#"{"queue":"billing"}"#).unwrap();
        assert_eq!(config.queue, "billing");
        assert_eq!(config.exchange, DEFAULT_EXCHANGE);
        assert!(config.continue_on_error);
    }
}
