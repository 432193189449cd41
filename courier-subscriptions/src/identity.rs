//! Runtime identity tokens for event and handler types.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of an event type.
///
/// Two tokens are equal iff they were created from the same Rust type.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    type_name: &'static str,
}

impl EventType {
    /// Token for `E`
    pub fn of<E: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
        }
    }

    /// The underlying `TypeId`
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Canonical event name, used as the routing key.
    ///
    /// `app::orders::OrderCreated` becomes `OrderCreated`. Generic types keep
    /// their full name so that different instantiations do not collide.
    ///
    /// Only the last segment counts: `billing::OrderCreated` and
    /// `shipping::OrderCreated` share the name `OrderCreated` and therefore one
    /// routing key and one registry entry. Give event types distinct names.
    pub fn name(&self) -> &'static str {
        canonical_name(self.type_name)
    }
}

/// Identity of a handler type.
#[derive(Clone, Copy)]
pub struct HandlerType {
    id: TypeId,
    type_name: &'static str,
}

impl HandlerType {
    /// Token for `H`
    pub fn of<H: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            type_name: std::any::type_name::<H>(),
        }
    }

    /// The underlying `TypeId`
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Short handler name for logs
    pub fn name(&self) -> &'static str {
        canonical_name(self.type_name)
    }
}

macro_rules! identity_by_type_id {
    ($token:ty) => {
        impl PartialEq for $token {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $token {}

        impl Hash for $token {
            fn hash<S: Hasher>(&self, state: &mut S) {
                self.id.hash(state);
            }
        }

        impl fmt::Debug for $token {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.type_name)
            }
        }

        impl fmt::Display for $token {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

identity_by_type_id!(EventType);
identity_by_type_id!(HandlerType);

fn canonical_name(type_name: &'static str) -> &'static str {
    if type_name.contains('<') {
        return type_name;
    }
    type_name.rsplit("::").next().unwrap_or(type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrderCreated;
    struct SendEmailHandler;
    struct Envelope<T>(T);

    #[test]
    fn test_event_name_is_short_type_name() {
        assert_eq!(EventType::of::<OrderCreated>().name(), "OrderCreated");
        assert_eq!(HandlerType::of::<SendEmailHandler>().name(), "SendEmailHandler");
    }

    #[test]
    fn test_generic_events_keep_full_name() {
        let a = EventType::of::<Envelope<u32>>();
        let b = EventType::of::<Envelope<String>>();
        assert_ne!(a.name(), b.name());
        assert_ne!(a, b);
    }

    #[test]
    fn test_equality_by_type() {
        assert_eq!(EventType::of::<OrderCreated>(), EventType::of::<OrderCreated>());
        assert_ne!(
            HandlerType::of::<OrderCreated>(),
            HandlerType::of::<SendEmailHandler>()
        );
    }

    #[test]
    fn test_display_uses_name() {
        assert_eq!(EventType::of::<OrderCreated>().to_string(), "OrderCreated");
        assert!(format!("{:?}", EventType::of::<OrderCreated>()).ends_with("::OrderCreated"));
    }
}
