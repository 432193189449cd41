//! Subscription registry errors

use thiserror::Error;

/// Result type for registry lookups
pub type Result<T> = std::result::Result<T, SubscriptionError>;

/// Errors raised by [`SubscriptionRegistry`](crate::SubscriptionRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// No binding is registered under this event name
    #[error("No event type is registered under the name '{0}'")]
    NoMatchingEventType(String),
}
