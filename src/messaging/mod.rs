// ============================================================================
// Message Bus Port
// ============================================================================
//
// The relay hands every event to a `MessageBus` as an `OutboundMessage`
// whose `message_id` is the outbox row id. Consumers receive the same id on
// `InboundMessage`, which is what the idempotency ledger keys on.
//
// Retries, timeouts and backoff belong to the transport behind this trait.
//
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PublishError;
use crate::events::{AnyEvent, RaisedEvent};

mod in_memory;

pub use in_memory::InMemoryBus;

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub message_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub event_type: String,
    /// W3C `traceparent` of the operation that raised the event.
    pub activity_context: Option<String>,
    pub event: Arc<dyn AnyEvent>,
}

impl OutboundMessage {
    /// Message for an outbox row and its decoded event.
    pub fn from_row(row: &RaisedEvent, event: Arc<dyn AnyEvent>) -> Self {
        Self {
            message_id: row.id,
            conversation_id: row.metadata.conversation_id,
            event_type: row.event_type.clone(),
            activity_context: row.metadata.activity_context.clone(),
            event,
        }
    }

    /// Turn a published message into what a consumer would receive, if the
    /// event is of type `M`.
    pub fn to_inbound<M: Clone + 'static>(&self) -> Option<InboundMessage<M>> {
        let body = self.event.as_any().downcast_ref::<M>()?.clone();
        Some(InboundMessage {
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            activity_context: self.activity_context.clone(),
            body,
        })
    }
}

/// A delivery handed to a consumer by the bus.
#[derive(Debug, Clone)]
pub struct InboundMessage<M> {
    pub message_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub activity_context: Option<String>,
    pub body: M,
}

impl<M> InboundMessage<M> {
    pub fn new(message_id: Uuid, body: M) -> Self {
        Self {
            message_id,
            conversation_id: None,
            activity_context: None,
            body,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_activity_context(mut self, traceparent: impl Into<String>) -> Self {
        self.activity_context = Some(traceparent.into());
        self
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}
