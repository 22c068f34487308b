use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

// ============================================================================
// Relay Metrics - Prometheus metrics for the outbox/inbox pipeline
// ============================================================================
//
// Covers:
// - outbox appends per event type
// - publishes by path (inline after commit, catch-up by the relay worker)
// - publish and serialization failures
// - inbound messages processed vs. filtered as duplicates
// - janitor deletions and the unpublished backlog
// - relay worker tick duration
//
// Components take `Option<Arc<RelayMetrics>>`; `None` disables recording.
// The registry is exposed for hosts that serve a scrape endpoint.
// ============================================================================

pub const PATH_INLINE: &str = "inline";
pub const PATH_CATCH_UP: &str = "catch_up";

pub struct RelayMetrics {
    registry: Registry,

    // Outbox
    pub events_appended: IntCounterVec,
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub serialization_failures: IntCounterVec,
    pub outbox_backlog: IntGauge,

    // Inbox
    pub messages_processed: IntCounterVec,
    pub messages_duplicate: IntCounterVec,

    // Background work
    pub janitor_deleted: IntCounterVec,
    pub relay_tick_duration: HistogramVec,
}

impl RelayMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_appended = IntCounterVec::new(
            Opts::new("outbox_events_appended_total", "Events written to the outbox"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("outbox_events_published_total", "Events handed to the bus"),
            &["event_type", "path"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("outbox_publish_failures_total", "Publish attempts the bus rejected"),
            &["event_type", "path"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let serialization_failures = IntCounterVec::new(
            Opts::new(
                "outbox_serialization_failures_total",
                "Events that could not be encoded or decoded",
            ),
            &["event_type", "direction"],
        )?;
        registry.register(Box::new(serialization_failures.clone()))?;

        let outbox_backlog = IntGauge::new(
            "outbox_unpublished_rows",
            "Unpublished outbox rows seen at the last relay tick",
        )?;
        registry.register(Box::new(outbox_backlog.clone()))?;

        let messages_processed = IntCounterVec::new(
            Opts::new("inbox_messages_processed_total", "Inbound messages processed"),
            &["consumer"],
        )?;
        registry.register(Box::new(messages_processed.clone()))?;

        let messages_duplicate = IntCounterVec::new(
            Opts::new(
                "inbox_messages_duplicate_total",
                "Inbound messages skipped as already consumed",
            ),
            &["consumer"],
        )?;
        registry.register(Box::new(messages_duplicate.clone()))?;

        let janitor_deleted = IntCounterVec::new(
            Opts::new("outbox_janitor_deleted_total", "Published rows removed by the janitor"),
            &["table"],
        )?;
        registry.register(Box::new(janitor_deleted.clone()))?;

        let relay_tick_duration = HistogramVec::new(
            HistogramOpts::new("outbox_relay_tick_duration_seconds", "Relay worker tick duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(relay_tick_duration.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            events_published,
            publish_failures,
            serialization_failures,
            outbox_backlog,
            messages_processed,
            messages_duplicate,
            janitor_deleted,
            relay_tick_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format, ready to serve on `/metrics`.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_appended(&self, event_type: &str) {
        self.events_appended.with_label_values(&[event_type]).inc();
    }

    pub fn record_publish(&self, event_type: &str, path: &str, success: bool) {
        if success {
            self.events_published.with_label_values(&[event_type, path]).inc();
        } else {
            self.publish_failures.with_label_values(&[event_type, path]).inc();
        }
    }

    /// `direction` is `"encode"` or `"decode"`.
    pub fn record_serialization_failure(&self, event_type: &str, direction: &str) {
        self.serialization_failures
            .with_label_values(&[event_type, direction])
            .inc();
    }

    pub fn record_consumed(&self, consumer: &str, duplicate: bool) {
        if duplicate {
            self.messages_duplicate.with_label_values(&[consumer]).inc();
        } else {
            self.messages_processed.with_label_values(&[consumer]).inc();
        }
    }

    pub fn record_janitor_sweep(&self, deleted: u64) {
        self.janitor_deleted.with_label_values(&["outbox"]).inc_by(deleted);
    }

    pub fn set_backlog(&self, unpublished: u64) {
        self.outbox_backlog.set(unpublished as i64);
    }

    pub fn record_tick(&self, duration_secs: f64, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.relay_tick_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }
}
