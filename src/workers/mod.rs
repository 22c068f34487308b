// ============================================================================
// Background Workers
// ============================================================================
//
// - RelayWorker:  republishes unpublished outbox rows (safety net for the
//                 inline relay)
// - OutboxJanitor: deletes published rows past the retention window
//
// Both implement `PeriodicTask` and are driven by `run_periodically` until
// their `CancellationToken` fires. `RelayHost` owns one loop of each.
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::store::OutboxStore;

mod janitor;
mod relay_worker;

pub use janitor::OutboxJanitor;
pub use relay_worker::{RelayWorker, TickReport};

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One pass. Long passes should check `cancel` between units of work.
    async fn run_once(&self, cancel: &CancellationToken);
}

/// Run `task` every `every` until `cancel` fires. The first pass starts
/// immediately. A pass in progress is never interrupted from outside.
pub async fn run_periodically<T>(task: Arc<T>, every: Duration, cancel: CancellationToken)
where
    T: PeriodicTask + ?Sized,
{
    tracing::info!(
        task = task.name(),
        interval_secs = every.as_secs(),
        "Background task started"
    );

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(task = task.name(), "Background task stopping");
                break;
            }
            _ = interval.tick() => {
                task.run_once(&cancel).await;
            }
        }
    }
}

/// Owns the relay worker and janitor loops of one process.
pub struct RelayHost {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl RelayHost {
    pub fn spawn<S: OutboxStore>(
        worker: Arc<RelayWorker<S>>,
        janitor: Arc<OutboxJanitor<S>>,
        config: &RelayConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let joins = vec![
            tokio::spawn(run_periodically(
                worker,
                config.relay_interval(),
                cancel.child_token(),
            )),
            tokio::spawn(run_periodically(
                janitor,
                config.janitor_interval(),
                cancel.child_token(),
            )),
        ];

        tracing::info!("🔄 Relay host started");
        Self { cancel, joins }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel both loops and wait for them. An in-flight relay tick stops
    /// after its current row.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Relay host stopped");
    }
}
