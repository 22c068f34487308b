use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConsumedMessage, ConsumedMessageStore, OutboxStore, UnitOfWork};
use crate::error::StoreError;
use crate::events::RaisedEvent;

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Transactional stand-in for a relational store:
//
// - writes are staged on `MemoryTx` and applied atomically on `commit`
// - dropping or rolling back a `MemoryTx` discards its writes
// - outbox ids and ledger keys are unique; a duplicate detected on commit
//   fails the whole commit with `StoreError::Conflict` (outbox) or
//   `StoreError::LedgerConflict` (ledger)
// - `records` is a small business key/value table so callers can prove
//   business writes and outbox rows commit (or vanish) together
//
// ============================================================================

#[derive(Default)]
struct MemoryState {
    outbox: HashMap<Uuid, RaisedEvent>,
    consumed: HashSet<ConsumedMessage>,
    records: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

/// Open in-memory transaction.
#[derive(Debug, Default)]
pub struct MemoryTx {
    outbox: Vec<RaisedEvent>,
    consumed: Vec<ConsumedMessage>,
    records: Vec<(String, serde_json::Value)>,
}

impl MemoryTx {
    /// Stage a business write.
    pub fn put_record(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.records.push((key.into(), value));
    }

    pub fn staged_events(&self) -> usize {
        self.outbox.len()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreError::Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    /// Insert a committed row directly, bypassing any transaction.
    pub async fn insert_row(&self, row: RaisedEvent) {
        self.state.lock().await.outbox.insert(row.id, row);
    }

    pub async fn get(&self, id: Uuid) -> Option<RaisedEvent> {
        self.state.lock().await.outbox.get(&id).cloned()
    }

    /// All committed outbox rows, oldest first.
    pub async fn rows(&self) -> Vec<RaisedEvent> {
        let state = self.state.lock().await;
        let mut rows: Vec<RaisedEvent> = state.outbox.values().cloned().collect();
        rows.sort_by_key(|row| (row.date_occurred, row.id));
        rows
    }

    pub async fn record(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().await.records.get(key).cloned()
    }

    pub async fn consumed_count(&self) -> usize {
        self.state.lock().await.consumed.len()
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.ensure_available()?;
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        if let Some(row) = tx.outbox.iter().find(|row| state.outbox.contains_key(&row.id)) {
            return Err(StoreError::Conflict(format!("outbox row {}", row.id)));
        }
        if let Some(key) = tx.consumed.iter().find(|key| state.consumed.contains(*key)) {
            return Err(StoreError::LedgerConflict(format!(
                "({}, {})",
                key.consumer_type, key.message_id
            )));
        }

        for row in tx.outbox {
            state.outbox.insert(row.id, row);
        }
        state.consumed.extend(tx.consumed);
        state.records.extend(tx.records);

        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn append(&self, tx: &mut MemoryTx, rows: &[RaisedEvent]) -> Result<(), StoreError> {
        self.ensure_available()?;
        tx.outbox.extend_from_slice(rows);
        Ok(())
    }

    async fn fetch_unpublished(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RaisedEvent>, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let mut rows: Vec<RaisedEvent> = state
            .outbox
            .values()
            .filter(|row| !row.was_published && row.date_occurred > after)
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.date_occurred, row.id));
        rows.truncate(limit);

        Ok(rows)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let row = state.outbox.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.was_published = true;
        Ok(())
    }

    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let before = state.outbox.len();
        state
            .outbox
            .retain(|_, row| !(row.was_published && row.date_occurred < cutoff));
        Ok((before - state.outbox.len()) as u64)
    }

    async fn count_unpublished(&self) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.outbox.values().filter(|row| !row.was_published).count() as u64)
    }
}

#[async_trait]
impl ConsumedMessageStore for InMemoryStore {
    async fn has_consumed(
        &self,
        tx: &mut MemoryTx,
        key: &ConsumedMessage,
    ) -> Result<bool, StoreError> {
        self.ensure_available()?;
        if tx.consumed.contains(key) {
            return Ok(true);
        }
        Ok(self.state.lock().await.consumed.contains(key))
    }

    async fn record_consumed(
        &self,
        tx: &mut MemoryTx,
        key: &ConsumedMessage,
    ) -> Result<bool, StoreError> {
        if self.has_consumed(tx, key).await? {
            return Ok(false);
        }
        tx.consumed.push(key.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::raised_row;
    use chrono::Duration;

    #[tokio::test]
    async fn test_append_is_invisible_until_commit() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        store
            .append(&mut tx, &[raised_row(Utc::now(), false)])
            .await
            .unwrap();
        tx.put_record("order-1", serde_json::json!({ "status": "placed" }));

        assert!(store.rows().await.is_empty());
        store.commit(tx).await.unwrap();

        assert_eq!(store.rows().await.len(), 1);
        assert!(store.record("order-1").await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_everything() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            store
                .append(&mut tx, &[raised_row(Utc::now(), false)])
                .await
                .unwrap();
            tx.put_record("order-1", serde_json::json!(1));
        }

        assert!(store.rows().await.is_empty());
        assert!(store.record("order-1").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_filters_orders_and_caps() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_row(raised_row(now - Duration::minutes(1), false)).await;
        store.insert_row(raised_row(now - Duration::minutes(3), false)).await;
        store.insert_row(raised_row(now - Duration::minutes(2), true)).await;
        store.insert_row(raised_row(now - Duration::days(2), false)).await;
        store.insert_row(raised_row(now - Duration::minutes(5), false)).await;

        let rows = store
            .fetch_unpublished(now - Duration::hours(1), 2)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| !row.was_published));
        assert_eq!(rows[0].date_occurred, now - Duration::minutes(5));
        assert_eq!(rows[1].date_occurred, now - Duration::minutes(3));
    }

    #[tokio::test]
    async fn test_mark_published_is_idempotent() {
        let store = InMemoryStore::new();
        let row = raised_row(Utc::now(), false);
        let id = row.id;
        store.insert_row(row).await;

        store.mark_published(id).await.unwrap();
        store.mark_published(id).await.unwrap();
        assert!(store.get(id).await.unwrap().was_published);
        assert_eq!(store.count_unpublished().await.unwrap(), 0);

        let missing = store.mark_published(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_keeps_unpublished_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_row(raised_row(now - Duration::days(30), false)).await;
        store.insert_row(raised_row(now - Duration::days(30), true)).await;
        store.insert_row(raised_row(now, true)).await;

        let deleted = store
            .delete_published_older_than(now - Duration::days(3))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.rows().await.len(), 2);
        assert_eq!(store.count_unpublished().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ledger_rejects_duplicates() {
        let store = InMemoryStore::new();
        let key = ConsumedMessage::new("InventoryReserver", Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        assert!(!store.has_consumed(&mut tx, &key).await.unwrap());
        assert!(store.record_consumed(&mut tx, &key).await.unwrap());
        assert!(!store.record_consumed(&mut tx, &key).await.unwrap());
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(store.has_consumed(&mut tx, &key).await.unwrap());
        assert!(!store.record_consumed(&mut tx, &key).await.unwrap());
        assert_eq!(store.consumed_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_ledger_insert_conflicts_on_commit() {
        let store = InMemoryStore::new();
        let key = ConsumedMessage::new("InventoryReserver", Uuid::new_v4());

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(store.record_consumed(&mut first, &key).await.unwrap());
        assert!(store.record_consumed(&mut second, &key).await.unwrap());

        store.commit(first).await.unwrap();
        let result = store.commit(second).await;
        assert!(matches!(result, Err(StoreError::LedgerConflict(_))));
        assert_eq!(store.consumed_count().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_operations() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.begin().await, Err(StoreError::Unavailable(_))));
        assert!(store.count_unpublished().await.is_err());

        store.set_unavailable(false);
        assert!(store.begin().await.is_ok());
    }
}
