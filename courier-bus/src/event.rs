//! Event definitions

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// Event trait
///
/// Events travel over the broker as JSON. The routing key is the short type
/// name, see [`EventType::name`](courier_subscriptions::EventType::name).
pub trait Event: Serialize + DeserializeOwned + Send + Sync + Debug + 'static {
    /// Event metadata
    fn metadata(&self) -> &EventMetadata;

    /// Get event ID
    fn event_id(&self) -> Uuid {
        self.metadata().id
    }

    /// Get creation timestamp
    fn created_at(&self) -> DateTime<Utc> {
        self.metadata().created_at
    }
}

/// Base event metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub id: Uuid,

    /// Timestamp when event was created
    pub created_at: DateTime<Utc>,

    /// Optional correlation ID for tracing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl EventMetadata {
    /// Create new event metadata
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            correlation_id: None,
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}
