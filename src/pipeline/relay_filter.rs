use std::sync::Arc;

use async_trait::async_trait;

use super::correlation::{with_correlation, CorrelationContext};
use crate::error::RelayError;
use crate::events::{capture_events_of, CapturedEvent};
use crate::messaging::{MessageBus, OutboundMessage};
use crate::metrics::PATH_INLINE;
use crate::store::{Outbox, OutboxStore, UnitOfWork};

// ============================================================================
// Inline Relay Filter
// ============================================================================
//
// Orchestrates: begin → handler (capture scope) → append events → commit
//               → publish each event → mark published
//
// Failure rules:
// - handler error: roll back, nothing appended, nothing published
// - serialization or store error before commit: roll back, propagate
// - publish error after commit: log and move on; the relay worker picks the
//   row up on its next tick
//
// ============================================================================

/// A command handler that writes through the relay's transaction.
#[async_trait]
pub trait CommandHandler<Tx: Send>: Send + Sync {
    type Command: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn handle(&self, tx: &mut Tx, command: Self::Command) -> anyhow::Result<Self::Output>;
}

/// Events persisted in a transaction, waiting for it to commit before they
/// go to the bus.
#[derive(Debug, Default)]
pub struct PendingPublish {
    messages: Vec<OutboundMessage>,
}

impl PendingPublish {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
}

pub struct InlineRelay<S: OutboxStore> {
    outbox: Outbox<S>,
    bus: Arc<dyn MessageBus>,
}

impl<S: OutboxStore> Clone for InlineRelay<S> {
    fn clone(&self) -> Self {
        Self {
            outbox: self.outbox.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<S: OutboxStore> InlineRelay<S> {
    pub fn new(outbox: Outbox<S>, bus: Arc<dyn MessageBus>) -> Self {
        Self { outbox, bus }
    }

    pub fn outbox(&self) -> &Outbox<S> {
        &self.outbox
    }

    pub fn store(&self) -> &Arc<S> {
        self.outbox.store()
    }

    /// Run `handler` in a fresh transaction with event capture, then commit
    /// and publish what it raised.
    pub async fn dispatch<H>(&self, handler: &H, command: H::Command) -> Result<H::Output, RelayError>
    where
        H: CommandHandler<S::Tx>,
    {
        let ctx = CorrelationContext::inherit_or_root(handler.name());
        with_correlation(ctx, self.run(handler, command)).await
    }

    async fn run<H>(&self, handler: &H, command: H::Command) -> Result<H::Output, RelayError>
    where
        H: CommandHandler<S::Tx>,
    {
        let store = self.outbox.store();
        let mut tx = store.begin().await?;

        let (result, events) = capture_events_of(handler.handle(&mut tx, command)).await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    discarded_events = events.len(),
                    "Command failed, discarding captured events"
                );
                self.rollback(tx).await;
                return Err(RelayError::Handler(e));
            }
        };

        let pending = match self.persist(&mut tx, &events).await {
            Ok(pending) => pending,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };

        store.commit(tx).await?;
        self.publish_pending(pending).await;

        Ok(output)
    }

    /// Append `events` inside `tx`, stamped with the ambient correlation.
    pub async fn persist(
        &self,
        tx: &mut S::Tx,
        events: &[CapturedEvent],
    ) -> Result<PendingPublish, RelayError> {
        let metadata = CorrelationContext::current()
            .map(|ctx| ctx.event_metadata())
            .unwrap_or_default();

        let rows = self.outbox.append(tx, events, metadata).await?;
        let messages = rows
            .iter()
            .zip(events)
            .map(|(row, captured)| OutboundMessage::from_row(row, captured.event.clone()))
            .collect();

        Ok(PendingPublish { messages })
    }

    /// Publish committed events one by one and flag each one that the bus
    /// accepted. Never fails: anything left unpublished is caught up later.
    pub async fn publish_pending(&self, pending: PendingPublish) -> PublishSummary {
        let mut summary = PublishSummary::default();

        for message in pending.messages {
            let event_id = message.message_id;
            let event_type = message.event_type.clone();

            match self.bus.publish(message).await {
                Ok(()) => {
                    self.record_publish(&event_type, true);
                    if let Err(e) = self.outbox.mark_published(event_id).await {
                        tracing::warn!(
                            event_id = %event_id,
                            error = %e,
                            "Published event but could not flag it, relay worker will republish"
                        );
                    }
                    summary.published += 1;
                }
                Err(e) => {
                    self.record_publish(&event_type, false);
                    tracing::warn!(
                        event_id = %event_id,
                        event_type = %event_type,
                        error = %e,
                        "⚠️  Immediate publish failed, leaving event for the relay worker"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary.published + summary.failed > 0 {
            tracing::debug!(
                published = summary.published,
                failed = summary.failed,
                "Inline publish finished"
            );
        }
        summary
    }

    async fn rollback(&self, tx: S::Tx) {
        if let Err(e) = self.outbox.store().rollback(tx).await {
            tracing::error!(error = %e, "Failed to roll back transaction");
        }
    }

    fn record_publish(&self, event_type: &str, success: bool) {
        if let Some(metrics) = self.outbox.metrics() {
            metrics.record_publish(event_type, PATH_INLINE, success);
        }
    }
}
