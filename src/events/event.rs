use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

// ============================================================================
// Domain Events - what business operations raise
// ============================================================================
//
// Three shapes of the same event:
//
// - `DomainEvent`:   the typed struct a handler raises
// - `CapturedEvent`: the type-erased event plus identity and occurrence time,
//                    held by a capture scope until the operation finishes
// - `RaisedEvent`:   the outbox row, payload serialized to a string
//
// ============================================================================

/// Typed domain event.
///
/// `event_type` is the stable tag stored with every outbox row and used by
/// the `EventSerializer` registry to find the matching decoder.
pub trait DomainEvent: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    fn event_type() -> &'static str where Self: Sized;
}

/// Object-safe view of any `DomainEvent`.
pub trait AnyEvent: Debug + Send + Sync + 'static {
    fn type_tag(&self) -> &'static str;
    fn to_json(&self) -> serde_json::Result<String>;
    fn as_any(&self) -> &dyn Any;
}

impl<E: DomainEvent> AnyEvent for E {
    fn type_tag(&self) -> &'static str {
        E::event_type()
    }

    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyEvent {
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    pub fn is<E: DomainEvent>(&self) -> bool {
        self.as_any().is::<E>()
    }
}

/// An event recorded by a capture scope, not yet serialized.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Becomes the outbox row id and the bus message id.
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: Arc<dyn AnyEvent>,
}

impl CapturedEvent {
    pub fn new<E: DomainEvent>(event: E) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            event: Arc::new(event),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.type_tag()
    }
}

/// Trace and conversation data stored alongside every outbox row.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EventMetadata {
    /// W3C `traceparent` of the operation that raised the event.
    pub activity_context: Option<String>,
    pub conversation_id: Option<Uuid>,
}

impl EventMetadata {
    pub fn new(activity_context: Option<String>, conversation_id: Option<Uuid>) -> Self {
        Self {
            activity_context,
            conversation_id,
        }
    }
}

/// Outbox row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RaisedEvent {
    pub id: Uuid,
    pub date_occurred: DateTime<Utc>,
    pub event_type: String,
    pub payload: String,
    pub metadata: EventMetadata,
    pub was_published: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{OrderPlaced, OrderShipped};

    #[test]
    fn test_captured_event_creation() {
        let order_id = Uuid::new_v4();
        let before = Utc::now();
        let captured = CapturedEvent::new(OrderPlaced { order_id, total_cents: 1200 });

        assert_eq!(captured.event_type(), "OrderPlaced");
        assert!(captured.occurred_at >= before);
        assert_eq!(captured.id.get_version_num(), 7);
    }

    #[test]
    fn test_downcast_erased_event() {
        let order_id = Uuid::new_v4();
        let captured = CapturedEvent::new(OrderPlaced { order_id, total_cents: 500 });

        assert!(captured.event.is::<OrderPlaced>());
        assert!(!captured.event.is::<OrderShipped>());

        let placed = captured.event.downcast_ref::<OrderPlaced>().unwrap();
        assert_eq!(placed.order_id, order_id);
        assert_eq!(placed.total_cents, 500);
    }

    #[test]
    fn test_erased_event_serialization() {
        let captured = CapturedEvent::new(OrderShipped {
            order_id: Uuid::nil(),
            carrier: "DHL".to_string(),
        });

        let json = captured.event.to_json().unwrap();
        assert!(json.contains("DHL"));

        let back: OrderShipped = serde_json::from_str(&json).unwrap();
        assert_eq!(back.carrier, "DHL");
    }
}
