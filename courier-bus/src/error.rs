//! Event bus errors

use courier_connection::ConnectionError;
use courier_subscriptions::SubscriptionError;
use thiserror::Error;

/// Result type for event bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Error raised by a single handler invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Failed to deserialize event for handler: {0}")]
    Deserialization(String),
}

impl HandlerError {
    /// Convenience constructor for handler implementations
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Event bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    #[error("Failed to deserialize message for '{event}': {reason}")]
    Deserialization { event: String, reason: String },

    #[error("No handler instance resolved for {handler} (event '{event}')")]
    HandlerNotResolved { event: String, handler: String },

    #[error("Handlers failed: {0:?}")]
    HandlersFailed(Vec<HandlerError>),

    #[error("No event type is registered under the name '{0}'")]
    NoMatchingEventType(String),
}

impl From<SubscriptionError> for BusError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::NoMatchingEventType(name) => Self::NoMatchingEventType(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_is_wrapped() {
        let err: BusError = ConnectionError::NotConnected.into();
        assert!(matches!(err, BusError::Connection(ConnectionError::NotConnected)));
        assert_eq!(
            err.to_string(),
            "No broker connection is available to perform this action"
        );
    }

    #[test]
    fn test_subscription_error_conversion() {
        let err: BusError = SubscriptionError::NoMatchingEventType("OrderCreated".into()).into();
        assert!(matches!(err, BusError::NoMatchingEventType(ref name) if name == "OrderCreated"));
    }
}
