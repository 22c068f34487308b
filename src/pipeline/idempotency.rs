use async_trait::async_trait;

use super::correlation::{with_correlation, CorrelationContext};
use super::relay_filter::InlineRelay;
use crate::error::{RelayError, StoreError};
use crate::events::capture_events_of;
use crate::messaging::InboundMessage;
use crate::store::{ConsumedMessage, ConsumedMessageStore, OutboxStore, UnitOfWork};

// ============================================================================
// Consumer Idempotency Filter
// ============================================================================
//
// Orchestrates, in ONE transaction:
//
//   ledger check → ledger insert → consumer (capture scope) → append events
//   → commit
//
// then publishes the captured events like the inline relay does.
//
// The (consumer_type, message_id) key is unique in the store. Two concurrent
// deliveries of the same message may both pass the check; the loser fails on
// insert or commit and is reported as a duplicate, with nothing committed.
//
// ============================================================================

/// A bus consumer that writes through the filter's transaction.
#[async_trait]
pub trait MessageConsumer<Tx: Send, M: Send + Sync + 'static>: Send + Sync {
    /// Stable name recorded in the ledger. Renaming it re-delivers history.
    fn consumer_type(&self) -> &str;

    async fn consume(&self, tx: &mut Tx, message: &InboundMessage<M>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Processed,
    /// Already consumed by this consumer type; nothing was invoked or written.
    Duplicate,
}

pub struct IdempotentConsumer<S>
where
    S: OutboxStore + ConsumedMessageStore,
{
    relay: InlineRelay<S>,
}

impl<S> Clone for IdempotentConsumer<S>
where
    S: OutboxStore + ConsumedMessageStore,
{
    fn clone(&self) -> Self {
        Self {
            relay: self.relay.clone(),
        }
    }
}

impl<S> IdempotentConsumer<S>
where
    S: OutboxStore + ConsumedMessageStore,
{
    pub fn new(relay: InlineRelay<S>) -> Self {
        Self { relay }
    }

    /// Deliver `message` to `consumer` unless this consumer type already
    /// processed it.
    pub async fn handle<C, M>(
        &self,
        consumer: &C,
        message: &InboundMessage<M>,
    ) -> Result<ConsumeOutcome, RelayError>
    where
        C: MessageConsumer<S::Tx, M>,
        M: Send + Sync + 'static,
    {
        let ctx = CorrelationContext::for_message(
            consumer.consumer_type(),
            message.message_id,
            message.conversation_id,
            message.activity_context.as_deref(),
        );
        with_correlation(ctx, self.run(consumer, message)).await
    }

    async fn run<C, M>(
        &self,
        consumer: &C,
        message: &InboundMessage<M>,
    ) -> Result<ConsumeOutcome, RelayError>
    where
        C: MessageConsumer<S::Tx, M>,
        M: Send + Sync + 'static,
    {
        let store = self.relay.store();
        let key = ConsumedMessage::new(consumer.consumer_type(), message.message_id);
        let mut tx = store.begin().await?;

        if store.has_consumed(&mut tx, &key).await? || !store.record_consumed(&mut tx, &key).await? {
            self.rollback(tx).await;
            return Ok(self.duplicate(&key));
        }

        let (result, events) = capture_events_of(consumer.consume(&mut tx, message)).await;
        if let Err(e) = result {
            tracing::warn!(
                consumer_type = %key.consumer_type,
                error = %e,
                discarded_events = events.len(),
                "Consumer failed, message stays unconsumed"
            );
            self.rollback(tx).await;
            return Err(RelayError::Handler(e));
        }

        let pending = match self.relay.persist(&mut tx, &events).await {
            Ok(pending) => pending,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };

        match store.commit(tx).await {
            Ok(()) => {}
            Err(StoreError::LedgerConflict(reason)) => {
                tracing::debug!(reason = %reason, "Lost the race for the ledger row");
                return Ok(self.duplicate(&key));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(metrics) = self.relay.outbox().metrics() {
            metrics.record_consumed(&key.consumer_type, false);
        }
        tracing::debug!(
            consumer_type = %key.consumer_type,
            events = pending.len(),
            "Message consumed"
        );

        self.relay.publish_pending(pending).await;
        Ok(ConsumeOutcome::Processed)
    }

    fn duplicate(&self, key: &ConsumedMessage) -> ConsumeOutcome {
        tracing::info!(
            consumer_type = %key.consumer_type,
            message_id = %key.message_id,
            "⏭️  Skipping already consumed message"
        );
        if let Some(metrics) = self.relay.outbox().metrics() {
            metrics.record_consumed(&key.consumer_type, true);
        }
        ConsumeOutcome::Duplicate
    }

    async fn rollback(&self, tx: S::Tx) {
        if let Err(e) = self.relay.store().rollback(tx).await {
            tracing::error!(error = %e, "Failed to roll back transaction");
        }
    }
}
