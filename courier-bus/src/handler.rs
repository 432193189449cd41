//! Event handlers and handler resolution

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use courier_subscriptions::{HandlerType, SubscriptionBinding};
use parking_lot::RwLock;

use crate::error::HandlerError;
use crate::event::Event;

/// Event handler trait
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Handle the event
    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

/// Type-erased event handler working on the raw message payload
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    /// Handler identity
    fn handler_type(&self) -> HandlerType;

    /// Decode `payload` and handle it
    async fn handle_payload(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

/// Wrapper for typed event handlers
pub struct TypedEventHandler<E, H> {
    handler: H,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event, H: EventHandler<E>> TypedEventHandler<E, H> {
    /// Wrap `handler` for dispatch on raw payloads
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _event: PhantomData,
        }
    }

    /// The wrapped handler
    pub fn inner(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<E: Event, H: EventHandler<E>> DynEventHandler for TypedEventHandler<E, H> {
    fn handler_type(&self) -> HandlerType {
        HandlerType::of::<H>()
    }

    async fn handle_payload(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: E = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::Deserialization(e.to_string()))?;
        self.handler.handle(&event).await
    }
}

/// Resolves a registered binding to a handler instance.
pub trait HandlerProvider: Send + Sync {
    /// Instance to run for `binding`, if one is available
    fn resolve(&self, binding: &SubscriptionBinding) -> Option<Arc<dyn DynEventHandler>>;
}

/// Handler instances keyed by binding.
///
/// ```rust,ignore
/// let catalog = HandlerCatalog::new();
/// catalog.register::<OrderCreated, _>(SendEmailHandler::default());
/// ```
#[derive(Default)]
pub struct HandlerCatalog {
    handlers: RwLock<HashMap<SubscriptionBinding, Arc<dyn DynEventHandler>>>,
}

impl HandlerCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of type `E`, replacing any previous instance.
    pub fn register<E, H>(&self, handler: H)
    where
        E: Event,
        H: EventHandler<E>,
    {
        let binding = SubscriptionBinding::of::<E, H>();
        self.handlers
            .write()
            .insert(binding, Arc::new(TypedEventHandler::<E, H>::new(handler)));
    }

    /// Drop the instance registered for `E` and `H`
    pub fn unregister<E, H>(&self) -> bool
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.handlers
            .write()
            .remove(&SubscriptionBinding::of::<E, H>())
            .is_some()
    }

    /// Whether an instance exists for `binding`
    pub fn contains(&self, binding: &SubscriptionBinding) -> bool {
        self.handlers.read().contains_key(binding)
    }

    /// Number of registered handler instances
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl HandlerProvider for HandlerCatalog {
    fn resolve(&self, binding: &SubscriptionBinding) -> Option<Arc<dyn DynEventHandler>> {
        self.handlers.read().get(binding).cloned()
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderCreated {
        metadata: EventMetadata,
        order_id: u64,
    }

    impl Event for OrderCreated {
        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    #[derive(Default)]
    struct LastOrder(AtomicU64);

    #[async_trait]
    impl EventHandler<OrderCreated> for LastOrder {
        async fn handle(&self, event: &OrderCreated) -> Result<(), HandlerError> {
            self.0.store(event.order_id, Ordering::SeqCst);
            Ok(())
        }
    }

    fn payload(order_id: u64) -> Vec<u8> {
        serde_json::to_vec(&OrderCreated {
            metadata: EventMetadata::new(),
            order_id,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let handler = TypedEventHandler::<OrderCreated, _>::new(LastOrder::default());

        handler.handle_payload(&payload(9)).await.unwrap();

        assert_eq!(handler.inner().0.load(Ordering::SeqCst), 9);
        assert_eq!(handler.handler_type(), HandlerType::of::<LastOrder>());
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_bad_payload() {
        let handler = TypedEventHandler::<OrderCreated, _>::new(LastOrder::default());

        let result = handler.handle_payload(br#"{"order_id":"nope"}"#).await;
        assert!(matches!(result, Err(HandlerError::Deserialization(_))));
    }

    #[test]
    fn test_catalog_resolves_registered_binding() {
        let catalog = HandlerCatalog::new();
        catalog.register::<OrderCreated, _>(LastOrder::default());

        let binding = SubscriptionBinding::of::<OrderCreated, LastOrder>();
        assert!(catalog.contains(&binding));
        assert!(catalog.resolve(&binding).is_some());

        assert!(catalog.unregister::<OrderCreated, LastOrder>());
        assert!(catalog.resolve(&binding).is_none());
        assert!(catalog.is_empty());
    }
}
