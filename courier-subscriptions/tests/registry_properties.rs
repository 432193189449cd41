//! Property tests for registry invariants under arbitrary add/remove sequences.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use courier_subscriptions::{EventType, HandlerType, SubscriptionRegistry};

struct OrderCreated;
struct OrderShipped;
struct OrderCancelled;

struct SendEmailHandler;
struct UpdateInventoryHandler;
struct AuditHandler;

fn event_types() -> [EventType; 3] {
    [
        EventType::of::<OrderCreated>(),
        EventType::of::<OrderShipped>(),
        EventType::of::<OrderCancelled>(),
    ]
}

fn handler_types() -> [HandlerType; 3] {
    [
        HandlerType::of::<SendEmailHandler>(),
        HandlerType::of::<UpdateInventoryHandler>(),
        HandlerType::of::<AuditHandler>(),
    ]
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(usize, usize),
    Remove(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 0..3usize).prop_map(|(e, h)| Op::Add(e, h)),
        (0..3usize, 0..3usize).prop_map(|(e, h)| Op::Remove(e, h)),
    ]
}

proptest! {
    #[test]
    fn registry_matches_ordered_model(ops in prop::collection::vec(op(), 0..64)) {
        let events = event_types();
        let handlers = handler_types();

        let registry = SubscriptionRegistry::new();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        registry.on_event_removed(move |name| sink.lock().push(name.to_string()));

        let mut model: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut expected_removed = Vec::new();

        for op in ops {
            match op {
                Op::Add(e, h) => {
                    let bindings = model.entry(e).or_default();
                    let fresh = !bindings.contains(&h);
                    if fresh {
                        bindings.push(h);
                    }
                    prop_assert_eq!(registry.add_subscription(events[e], handlers[h]), fresh);
                }
                Op::Remove(e, h) => {
                    let mut present = false;
                    if let Some(bindings) = model.get_mut(&e) {
                        if let Some(pos) = bindings.iter().position(|x| *x == h) {
                            present = true;
                            bindings.remove(pos);
                            if bindings.is_empty() {
                                model.remove(&e);
                                expected_removed.push(events[e].name().to_string());
                            }
                        }
                    }
                    prop_assert_eq!(registry.remove_subscription(events[e], handlers[h]), present);
                }
            }

            for (e, event_type) in events.iter().enumerate() {
                let name = registry.event_identifier(*event_type);
                let actual: Vec<HandlerType> = registry
                    .handlers_for_event(name)
                    .into_iter()
                    .map(|b| b.handler_type)
                    .collect();
                let wanted: Vec<HandlerType> = model
                    .get(&e)
                    .map(|hs| hs.iter().map(|h| handlers[*h]).collect())
                    .unwrap_or_default();

                prop_assert_eq!(&actual, &wanted);
                prop_assert_eq!(registry.has_subscriptions_for_event(name), !actual.is_empty());
            }

            prop_assert!(registry.all_subscriptions().values().all(|b| !b.is_empty()));
            prop_assert_eq!(registry.is_empty(), model.is_empty());
        }

        prop_assert_eq!(&*removed.lock(), &expected_removed);

        registry.clear();
        prop_assert!(registry.is_empty());
    }
}
