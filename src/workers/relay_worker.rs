use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::PeriodicTask;
use crate::config::RelayConfig;
use crate::error::{RelayError, StoreError};
use crate::events::RaisedEvent;
use crate::messaging::{MessageBus, OutboundMessage};
use crate::metrics::PATH_CATCH_UP;
use crate::store::{Outbox, OutboxStore};

// ============================================================================
// Relay Worker - catch-up publisher for the outbox table
// ============================================================================
//
// Per tick:
// 1. fetch up to `max_batch` unpublished rows newer than now - `window`,
//    oldest first
// 2. for each row: decode → publish (message id = row id) → mark published
// 3. a failing row is logged and skipped; the rest of the batch continues
// 4. cancellation is checked between rows, never mid-row
//
// Rows are flagged one at a time so a crash loses at most the row in flight.
//
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
    /// The tick stopped early on cancellation.
    pub cancelled: bool,
}

pub struct RelayWorker<S: OutboxStore> {
    outbox: Outbox<S>,
    bus: Arc<dyn MessageBus>,
    window: chrono::Duration,
    max_batch: usize,
}

impl<S: OutboxStore> RelayWorker<S> {
    pub fn new(outbox: Outbox<S>, bus: Arc<dyn MessageBus>) -> Self {
        Self::from_config(outbox, bus, &RelayConfig::default())
    }

    pub fn from_config(outbox: Outbox<S>, bus: Arc<dyn MessageBus>, config: &RelayConfig) -> Self {
        Self {
            outbox,
            bus,
            window: config.relay_window(),
            max_batch: config.max_batch,
        }
    }

    pub fn with_window(mut self, window: chrono::Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// One scan-and-publish pass. Only a failed fetch is an error; per-row
    /// failures are counted in the report.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport, StoreError> {
        let started = Instant::now();
        let after = Utc::now()
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let rows = match self.outbox.fetch_unpublished(after, self.max_batch).await {
            Ok(rows) => rows,
            Err(e) => {
                if let Some(metrics) = self.outbox.metrics() {
                    metrics.record_tick(started.elapsed().as_secs_f64(), false);
                }
                return Err(e);
            }
        };

        let mut report = TickReport {
            fetched: rows.len(),
            ..TickReport::default()
        };
        if !rows.is_empty() {
            tracing::info!(row_count = rows.len(), "📬 Fetched unpublished outbox rows");
        }

        for row in &rows {
            if cancel.is_cancelled() {
                tracing::info!(
                    remaining = report.fetched - report.published - report.failed,
                    "Relay tick cancelled"
                );
                report.cancelled = true;
                break;
            }

            match self.relay_row(row).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    tracing::error!(
                        event_id = %row.id,
                        event_type = %row.event_type,
                        error_kind = e.kind(),
                        error = %e,
                        "❌ Failed to relay outbox row"
                    );
                    report.failed += 1;
                }
            }
        }

        self.refresh_backlog().await;
        if let Some(metrics) = self.outbox.metrics() {
            metrics.record_tick(started.elapsed().as_secs_f64(), true);
        }
        if report.fetched > 0 {
            tracing::info!(
                published = report.published,
                failed = report.failed,
                cancelled = report.cancelled,
                "Relay tick finished"
            );
        }

        Ok(report)
    }

    async fn relay_row(&self, row: &RaisedEvent) -> Result<(), RelayError> {
        let span = tracing::info_span!(
            "relay_row",
            event_id = %row.id,
            event_type = %row.event_type,
            conversation_id = tracing::field::Empty,
            activity_context = tracing::field::Empty,
        );
        if let Some(conversation_id) = row.metadata.conversation_id {
            span.record("conversation_id", tracing::field::display(conversation_id));
        }
        if let Some(activity_context) = &row.metadata.activity_context {
            span.record("activity_context", activity_context.as_str());
        }

        async {
            let event = self.outbox.serializer().extract(row).inspect_err(|_| {
                if let Some(metrics) = self.outbox.metrics() {
                    metrics.record_serialization_failure(&row.event_type, "decode");
                }
            })?;

            let published = self.bus.publish(OutboundMessage::from_row(row, event)).await;
            if let Some(metrics) = self.outbox.metrics() {
                metrics.record_publish(&row.event_type, PATH_CATCH_UP, published.is_ok());
            }
            published?;

            self.outbox.mark_published(row.id).await?;
            tracing::debug!("✅ Republished outbox row");
            Ok::<(), RelayError>(())
        }
        .instrument(span)
        .await
    }

    async fn refresh_backlog(&self) {
        let Some(metrics) = self.outbox.metrics() else {
            return;
        };
        match self.outbox.count_unpublished().await {
            Ok(count) => metrics.set_backlog(count),
            Err(e) => tracing::warn!(error = %e, "Could not count unpublished rows"),
        }
    }
}

#[async_trait]
impl<S: OutboxStore> PeriodicTask for RelayWorker<S> {
    fn name(&self) -> &'static str {
        "outbox-relay"
    }

    async fn run_once(&self, cancel: &CancellationToken) {
        if let Err(e) = self.tick(cancel).await {
            tracing::error!(error = %e, "Relay tick failed, retrying next interval");
        }
    }
}
