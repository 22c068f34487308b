//! Reliable domain-event relay.
//!
//! Business operations raise domain events anywhere in their call graph; the
//! relay records them in an outbox table inside the operation's own
//! transaction, publishes them right after commit, and republishes anything
//! left behind from a background worker. Consumers are wrapped in an inbox
//! filter so redelivered messages are processed at most once per consumer
//! type.
//!
//! ```text
//! CommandHandler ──► InlineRelay ──► OutboxStore (same tx) ──► MessageBus
//!                                        ▲                        │
//!                         RelayWorker ───┘ (catch-up)             ▼
//!                         OutboxJanitor (retention)     IdempotentConsumer
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod messaging;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod workers;

#[cfg(test)]
mod fixtures;

pub use config::RelayConfig;
pub use error::{
    CaptureViolation, ConfigError, PublishError, RelayError, SerializationError, StoreError,
};
pub use events::{
    capture_events_of, in_current_scope, raise, try_raise, CapturePolicy, CapturedEvent,
    DomainEvent, EventMetadata, EventSerializer, RaisedEvent,
};
pub use messaging::{InMemoryBus, InboundMessage, MessageBus, OutboundMessage};
pub use metrics::RelayMetrics;
pub use pipeline::{
    CommandHandler, ConsumeOutcome, CorrelationContext, IdempotentConsumer, InlineRelay,
    MessageConsumer,
};
pub use store::{
    ConsumedMessage, ConsumedMessageStore, InMemoryStore, MemoryTx, Outbox, OutboxStore,
    PgOutboxStore, UnitOfWork,
};
pub use workers::{run_periodically, OutboxJanitor, PeriodicTask, RelayHost, RelayWorker};
