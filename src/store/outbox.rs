use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::OutboxStore;
use crate::error::{RelayError, StoreError};
use crate::events::{CapturedEvent, EventMetadata, EventSerializer, RaisedEvent};
use crate::metrics::RelayMetrics;

/// Outbox facade: serializes captured events into rows and forwards row
/// operations to the underlying `OutboxStore`.
pub struct Outbox<S: OutboxStore> {
    store: Arc<S>,
    serializer: Arc<EventSerializer>,
    metrics: Option<Arc<RelayMetrics>>,
}

impl<S: OutboxStore> Clone for Outbox<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            serializer: self.serializer.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: OutboxStore> Outbox<S> {
    pub fn new(store: Arc<S>, serializer: Arc<EventSerializer>) -> Self {
        Self {
            store,
            serializer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn serializer(&self) -> &Arc<EventSerializer> {
        &self.serializer
    }

    pub fn metrics(&self) -> Option<&Arc<RelayMetrics>> {
        self.metrics.as_ref()
    }

    /// Serialize `events` and insert them inside `tx`, in raise order.
    ///
    /// Every event is serialized before anything is written: one bad event
    /// fails the whole append and the caller's transaction must not commit.
    pub async fn append(
        &self,
        tx: &mut S::Tx,
        events: &[CapturedEvent],
        metadata: EventMetadata,
    ) -> Result<Vec<RaisedEvent>, RelayError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(events.len());
        for captured in events {
            match self.serializer.wrap(captured, metadata.clone()) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::error!(
                        event_id = %captured.id,
                        event_type = captured.event_type(),
                        error = %e,
                        "❌ Failed to serialize domain event"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_serialization_failure(captured.event_type(), "encode");
                    }
                    return Err(e.into());
                }
            }
        }

        self.store.append(tx, &rows).await?;

        if let Some(metrics) = &self.metrics {
            for row in &rows {
                metrics.record_appended(&row.event_type);
            }
        }
        tracing::debug!(count = rows.len(), "Appended events to outbox");

        Ok(rows)
    }

    pub async fn fetch_unpublished(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RaisedEvent>, StoreError> {
        self.store.fetch_unpublished(after, limit).await
    }

    pub async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        self.store.mark_published(id).await
    }

    pub async fn delete_published_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.store.delete_published_older_than(cutoff).await
    }

    pub async fn count_unpublished(&self) -> Result<u64, StoreError> {
        self.store.count_unpublished().await
    }
}
