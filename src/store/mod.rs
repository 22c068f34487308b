// ============================================================================
// Store Ports - unit of work, outbox table, consumed-message ledger
// ============================================================================
//
// The relay never talks to a database directly; it talks to these traits.
//
// - `UnitOfWork`:           begin/commit/rollback of the business transaction
// - `OutboxStore`:          RaisedEvent rows (append inside a transaction,
//                           everything else in short standalone operations)
// - `ConsumedMessageStore`: (consumer_type, message_id) ledger rows
//
// Adapters:
// - `InMemoryStore`  - staged writes applied on commit (tests, demo)
// - `PgOutboxStore`  - PostgreSQL via sqlx
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::RaisedEvent;

mod memory;
mod outbox;
mod postgres;

pub use memory::{InMemoryStore, MemoryTx};
pub use outbox::Outbox;
pub use postgres::PgOutboxStore;

/// Inbox ledger key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConsumedMessage {
    pub consumer_type: String,
    pub message_id: Uuid,
}

impl ConsumedMessage {
    pub fn new(consumer_type: impl Into<String>, message_id: Uuid) -> Self {
        Self {
            consumer_type: consumer_type.into(),
            message_id,
        }
    }
}

#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    /// Open transaction. Dropping it without `commit` discards its writes.
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OutboxStore: UnitOfWork {
    /// Insert rows inside the caller's transaction. Never commits.
    async fn append(&self, tx: &mut Self::Tx, rows: &[RaisedEvent]) -> Result<(), StoreError>;

    /// Unpublished rows with `date_occurred > after`, oldest first, at most `limit`.
    async fn fetch_unpublished(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RaisedEvent>, StoreError>;

    /// Flip `was_published` and persist. Already-published rows are left as is.
    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError>;

    /// Delete rows that are published AND older than `cutoff`. Returns the count.
    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count_unpublished(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ConsumedMessageStore: UnitOfWork {
    async fn has_consumed(
        &self,
        tx: &mut Self::Tx,
        key: &ConsumedMessage,
    ) -> Result<bool, StoreError>;

    /// Insert the ledger row. Returns `false` if the key already exists.
    async fn record_consumed(
        &self,
        tx: &mut Self::Tx,
        key: &ConsumedMessage,
    ) -> Result<bool, StoreError>;
}
