//! Event name to handler binding index

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::binding::SubscriptionBinding;
use crate::error::{Result, SubscriptionError};
use crate::identity::{EventType, HandlerType};

/// Callback fired with the event name when its last binding is removed.
pub type EventRemovedListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Tracks which handler types run for each event name.
///
/// Every key maps to a non-empty, duplicate-free sequence of bindings in
/// registration order. Mutations take the write lock once; reads return
/// copies taken under the read lock.
///
/// # Examples
///
/// ```rust
/// use courier_subscriptions::{EventType, HandlerType, SubscriptionRegistry};
///
/// struct OrderCreated;
/// struct SendEmailHandler;
///
/// let registry = SubscriptionRegistry::new();
/// registry.add_subscription(EventType::of::<OrderCreated>(), HandlerType::of::<SendEmailHandler>());
///
/// assert!(registry.has_subscriptions_for_event("OrderCreated"));
/// assert_eq!(registry.handlers_for_event("OrderCreated").len(), 1);
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    index: RwLock<HashMap<String, Vec<SubscriptionBinding>>>,
    listeners: RwLock<Vec<EventRemovedListener>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler_type` for `event_type`.
    ///
    /// Returns `false` if the binding was already present.
    pub fn add_subscription(&self, event_type: EventType, handler_type: HandlerType) -> bool {
        let binding = SubscriptionBinding::new(event_type, handler_type);
        let key = self.event_identifier(event_type);

        let mut index = self.index.write();
        let bindings = index.entry(key.to_string()).or_default();
        if bindings.contains(&binding) {
            debug!(
                event = key,
                handler = handler_type.name(),
                "Handler already registered"
            );
            return false;
        }
        bindings.push(binding);
        debug!(event = key, handler = handler_type.name(), "Subscription added");
        true
    }

    /// Typed shorthand for [`add_subscription`](Self::add_subscription)
    pub fn add<E: ?Sized + 'static, H: ?Sized + 'static>(&self) -> bool {
        self.add_subscription(EventType::of::<E>(), HandlerType::of::<H>())
    }

    /// Remove the binding of `handler_type` to `event_type`.
    ///
    /// When this removes the last binding for the event name, the key is
    /// dropped and the "event removed" listeners fire with that name. Returns
    /// `false` if the binding was not registered.
    pub fn remove_subscription(&self, event_type: EventType, handler_type: HandlerType) -> bool {
        let binding = SubscriptionBinding::new(event_type, handler_type);
        let key = self.event_identifier(event_type);

        let emptied = {
            let mut index = self.index.write();
            let Some(bindings) = index.get_mut(key) else {
                return false;
            };
            let Some(position) = bindings.iter().position(|b| *b == binding) else {
                return false;
            };
            bindings.remove(position);
            let emptied = bindings.is_empty();
            if emptied {
                index.remove(key);
            }
            emptied
        };

        debug!(event = key, handler = handler_type.name(), "Subscription removed");

        if emptied {
            self.notify_event_removed(key);
        }
        true
    }

    /// Typed shorthand for [`remove_subscription`](Self::remove_subscription)
    pub fn remove<E: ?Sized + 'static, H: ?Sized + 'static>(&self) -> bool {
        self.remove_subscription(EventType::of::<E>(), HandlerType::of::<H>())
    }

    /// Drop every binding. No per-event notifications fire.
    pub fn clear(&self) {
        self.index.write().clear();
    }

    /// True iff no event name has bindings
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Number of event names with bindings
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// True iff `event_name` has at least one binding
    pub fn has_subscriptions_for_event(&self, event_name: &str) -> bool {
        self.index.read().contains_key(event_name)
    }

    /// Key under which bindings for `event_type` are stored.
    pub fn event_identifier(&self, event_type: EventType) -> &'static str {
        event_type.name()
    }

    /// Reverse lookup from event name to event type.
    pub fn event_type_by_name(&self, event_name: &str) -> Result<EventType> {
        self.index
            .read()
            .get(event_name)
            .and_then(|bindings| bindings.first())
            .map(|binding| binding.event_type)
            .ok_or_else(|| SubscriptionError::NoMatchingEventType(event_name.to_string()))
    }

    /// Bindings for `event_name` in registration order; empty when unknown.
    pub fn handlers_for_event(&self, event_name: &str) -> Vec<SubscriptionBinding> {
        self.index
            .read()
            .get(event_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the whole index
    pub fn all_subscriptions(&self) -> HashMap<String, Vec<SubscriptionBinding>> {
        self.index.read().clone()
    }

    /// Register a callback for "event removed".
    ///
    /// Runs synchronously on the thread that removed the last binding, after
    /// the registry lock is released.
    pub fn on_event_removed<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    fn notify_event_removed(&self, event_name: &str) {
        let listeners: Vec<EventRemovedListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(event_name);
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("index", &*self.index.read())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
