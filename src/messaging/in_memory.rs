use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MessageBus, OutboundMessage};
use crate::error::PublishError;

/// Bus that keeps every accepted message in memory.
///
/// Failure injection: `set_failing(true)` rejects everything,
/// `fail_event_type` rejects one event type until `clear_failures`.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    published: Arc<Mutex<Vec<OutboundMessage>>>,
    failing: Arc<AtomicBool>,
    failing_types: Arc<Mutex<HashSet<String>>>,
    attempts: Arc<AtomicUsize>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn fail_event_type(&self, event_type: impl Into<String>) {
        self.failing_types.lock().await.insert(event_type.into());
    }

    pub async fn clear_failures(&self) {
        self.set_failing(false);
        self.failing_types.lock().await.clear();
    }

    /// Accepted messages, in publish order.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }

    /// Publish calls made, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("in-memory bus switched off".to_string()));
        }
        if self.failing_types.lock().await.contains(&message.event_type) {
            return Err(PublishError::Rejected {
                message_id: message.message_id,
                reason: format!("{} is rejected", message.event_type),
            });
        }

        tracing::debug!(
            message_id = %message.message_id,
            event_type = %message.event_type,
            "Published to in-memory bus"
        );
        self.published.lock().await.push(message);
        Ok(())
    }
}
