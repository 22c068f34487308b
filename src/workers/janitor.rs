use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::PeriodicTask;
use crate::config::RelayConfig;
use crate::error::StoreError;
use crate::store::{Outbox, OutboxStore};

/// Deletes published outbox rows older than the retention window.
/// Unpublished rows are never touched, however old.
pub struct OutboxJanitor<S: OutboxStore> {
    outbox: Outbox<S>,
    retention: chrono::Duration,
}

impl<S: OutboxStore> OutboxJanitor<S> {
    pub fn new(outbox: Outbox<S>, retention: chrono::Duration) -> Self {
        Self { outbox, retention }
    }

    pub fn from_config(outbox: Outbox<S>, config: &RelayConfig) -> Self {
        Self::new(outbox, config.retention())
    }

    pub async fn sweep(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.outbox.delete_published_older_than(cutoff).await?;

        if let Some(metrics) = self.outbox.metrics() {
            metrics.record_janitor_sweep(deleted);
        }
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "🧹 Purged published outbox rows");
        } else {
            tracing::debug!(cutoff = %cutoff, "Outbox janitor: no rows to purge");
        }

        Ok(deleted)
    }
}

#[async_trait]
impl<S: OutboxStore> PeriodicTask for OutboxJanitor<S> {
    fn name(&self) -> &'static str {
        "outbox-janitor"
    }

    async fn run_once(&self, _cancel: &CancellationToken) {
        if let Err(e) = self.sweep().await {
            tracing::error!(error = %e, "Outbox janitor: cleanup failed");
        }
    }
}
