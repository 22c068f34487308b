use std::collections::HashMap;
use std::sync::Arc;

use super::event::{AnyEvent, CapturedEvent, DomainEvent, EventMetadata, RaisedEvent};
use crate::error::SerializationError;

/// Upper bound for the `event_type` column.
pub const MAX_EVENT_TYPE_LEN: usize = 500;

type Decoder = fn(&str) -> serde_json::Result<Arc<dyn AnyEvent>>;

fn decode<E: DomainEvent>(payload: &str) -> serde_json::Result<Arc<dyn AnyEvent>> {
    let event: E = serde_json::from_str(payload)?;
    Ok(Arc::new(event))
}

/// Converts captured events to outbox rows and back.
///
/// Decoding is driven by an explicit registry (type tag -> decoder) that the
/// host fills once at startup; nothing is resolved by scanning types at
/// runtime.
///
/// ```ignore
/// let serializer = EventSerializer::new()
///     .with::<OrderPlaced>()?
///     .with::<OrderShipped>()?;
/// ```
#[derive(Default)]
pub struct EventSerializer {
    decoders: HashMap<&'static str, Decoder>,
}

impl EventSerializer {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register<E: DomainEvent>(&mut self) -> Result<(), SerializationError> {
        let tag = E::event_type();
        if tag.len() > MAX_EVENT_TYPE_LEN {
            return Err(SerializationError::EventTypeTooLong {
                event_type: tag.to_string(),
                max: MAX_EVENT_TYPE_LEN,
            });
        }
        if self.decoders.contains_key(tag) {
            return Err(SerializationError::AlreadyRegistered(tag.to_string()));
        }
        self.decoders.insert(tag, decode::<E> as Decoder);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with<E: DomainEvent>(mut self) -> Result<Self, SerializationError> {
        self.register::<E>()?;
        Ok(self)
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Serialize a captured event into an unpublished outbox row.
    pub fn wrap(
        &self,
        captured: &CapturedEvent,
        metadata: EventMetadata,
    ) -> Result<RaisedEvent, SerializationError> {
        let event_type = captured.event_type();
        if event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(SerializationError::EventTypeTooLong {
                event_type: event_type.to_string(),
                max: MAX_EVENT_TYPE_LEN,
            });
        }

        let payload = captured
            .event
            .to_json()
            .map_err(|source| SerializationError::Encode {
                event_type: event_type.to_string(),
                source,
            })?;

        Ok(RaisedEvent {
            id: captured.id,
            date_occurred: captured.occurred_at,
            event_type: event_type.to_string(),
            payload,
            metadata,
            was_published: false,
        })
    }

    /// Rebuild the typed event stored in an outbox row.
    pub fn extract(&self, row: &RaisedEvent) -> Result<Arc<dyn AnyEvent>, SerializationError> {
        let decoder = self
            .decoders
            .get(row.event_type.as_str())
            .ok_or_else(|| SerializationError::UnknownEventType(row.event_type.clone()))?;

        decoder(&row.payload).map_err(|source| SerializationError::Decode {
            event_type: row.event_type.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{OrderPlaced, OrderShipped};
    use uuid::Uuid;

    fn serializer() -> EventSerializer {
        EventSerializer::new()
            .with::<OrderPlaced>()
            .unwrap()
            .with::<OrderShipped>()
            .unwrap()
    }

    #[test]
    fn test_wrap_builds_unpublished_row() {
        let captured = CapturedEvent::new(OrderPlaced {
            order_id: Uuid::new_v4(),
            total_cents: 4200,
        });
        let conversation_id = Uuid::new_v4();
        let metadata = EventMetadata::new(Some("00-abc".to_string()), Some(conversation_id));

        let row = serializer().wrap(&captured, metadata.clone()).unwrap();

        assert_eq!(row.id, captured.id);
        assert_eq!(row.date_occurred, captured.occurred_at);
        assert_eq!(row.event_type, "OrderPlaced");
        assert_eq!(row.metadata, metadata);
        assert!(!row.was_published);
        assert!(row.payload.contains("4200"));
    }

    #[test]
    fn test_extract_resolves_registered_type() {
        let order_id = Uuid::new_v4();
        let serializer = serializer();
        let captured = CapturedEvent::new(OrderShipped {
            order_id,
            carrier: "UPS".to_string(),
        });
        let row = serializer.wrap(&captured, EventMetadata::default()).unwrap();

        let event = serializer.extract(&row).unwrap();
        let shipped = event.downcast_ref::<OrderShipped>().unwrap();
        assert_eq!(shipped.order_id, order_id);
        assert_eq!(shipped.carrier, "UPS");
    }

    #[test]
    fn test_extract_unknown_type_fails() {
        let serializer = EventSerializer::new().with::<OrderPlaced>().unwrap();
        let captured = CapturedEvent::new(OrderShipped {
            order_id: Uuid::new_v4(),
            carrier: "UPS".to_string(),
        });
        let row = serializer.wrap(&captured, EventMetadata::default()).unwrap();

        let err = serializer.extract(&row).unwrap_err();
        assert!(matches!(err, SerializationError::UnknownEventType(t) if t == "OrderShipped"));
    }

    #[test]
    fn test_extract_corrupt_payload_fails() {
        let serializer = serializer();
        let captured = CapturedEvent::new(OrderPlaced {
            order_id: Uuid::new_v4(),
            total_cents: 1,
        });
        let mut row = serializer.wrap(&captured, EventMetadata::default()).unwrap();
        row.payload = "{not json".to_string();

        let err = serializer.extract(&row).unwrap_err();
        assert!(matches!(err, SerializationError::Decode { .. }));
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut serializer = EventSerializer::new();
        serializer.register::<OrderPlaced>().unwrap();
        let result = serializer.register::<OrderPlaced>();
        assert!(matches!(result, Err(SerializationError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_registered_types_sorted() {
        assert_eq!(serializer().registered_types(), vec!["OrderPlaced", "OrderShipped"]);
        assert!(serializer().is_registered("OrderPlaced"));
        assert!(!serializer().is_registered("OrderCancelled"));
    }
}
