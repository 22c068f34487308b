// ============================================================================
// Domain Events - capture, serialization, outbox row shape
// ============================================================================
//
// Generic over any event type; no business-specific code lives here.
//
// ============================================================================

pub mod capture;
pub mod event;
pub mod serializer;

pub use capture::{
    capture_events_of, capture_policy, in_current_scope, is_capturing, raise,
    set_capture_policy, try_raise, CapturePolicy, EventCollector,
};
pub use event::{AnyEvent, CapturedEvent, DomainEvent, EventMetadata, RaisedEvent};
pub use serializer::{EventSerializer, MAX_EVENT_TYPE_LEN};
