use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{ConsumedMessage, ConsumedMessageStore, OutboxStore, UnitOfWork};
use crate::error::StoreError;
use crate::events::{EventMetadata, RaisedEvent};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Tables:
//
//   outbox_events      (id PK, date_occurred, was_published, event_type,
//                       payload, activity_context, conversation_id)
//   consumed_messages  (consumer_type, message_id) PK
//
// The composite index on (date_occurred, was_published) serves both the
// relay worker's catch-up scan and the janitor's delete.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox_events (
        id               UUID PRIMARY KEY,
        date_occurred    TIMESTAMPTZ NOT NULL,
        was_published    BOOLEAN NOT NULL DEFAULT FALSE,
        event_type       VARCHAR(500) NOT NULL,
        payload          TEXT NOT NULL,
        activity_context TEXT NULL,
        conversation_id  UUID NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_outbox_events_date_occurred_was_published
        ON outbox_events (date_occurred, was_published)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consumed_messages (
        consumer_type VARCHAR(500) NOT NULL,
        message_id    UUID NOT NULL,
        consumed_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT consumed_messages_pkey PRIMARY KEY (consumer_type, message_id)
    )
    "#,
];

const LEDGER_CONSTRAINT: &str = "consumed_messages_pkey";

/// Unique violations on the ledger key mean a concurrent duplicate; any
/// other unique violation is a plain conflict.
fn classify(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.constraint() == Some(LEDGER_CONSTRAINT) {
                StoreError::LedgerConflict(db.message().to_string())
            } else {
                StoreError::Conflict(db.message().to_string())
            }
        }
        other => StoreError::Database(other),
    }
}

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they are missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("✅ Outbox schema ready");
        Ok(())
    }
}

fn row_to_event(row: &PgRow) -> Result<RaisedEvent, sqlx::Error> {
    Ok(RaisedEvent {
        id: row.try_get("id")?,
        date_occurred: row.try_get("date_occurred")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        metadata: EventMetadata {
            activity_context: row.try_get("activity_context")?,
            conversation_id: row.try_get("conversation_id")?,
        },
        was_published: row.try_get("was_published")?,
    })
}

#[async_trait]
impl UnitOfWork for PgOutboxStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await.map_err(classify)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Ok(tx.rollback().await?)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn append(&self, tx: &mut Self::Tx, rows: &[RaisedEvent]) -> Result<(), StoreError> {
        for event in rows {
            sqlx::query(
                r#"
                INSERT INTO outbox_events
                    (id, date_occurred, was_published, event_type, payload,
                     activity_context, conversation_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.id)
            .bind(event.date_occurred)
            .bind(event.was_published)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&event.metadata.activity_context)
            .bind(event.metadata.conversation_id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;
        }
        Ok(())
    }

    async fn fetch_unpublished(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RaisedEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, date_occurred, was_published, event_type, payload,
                   activity_context, conversation_id
            FROM outbox_events
            WHERE date_occurred > $1 AND was_published = FALSE
            ORDER BY date_occurred ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE outbox_events SET was_published = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE was_published = TRUE AND date_occurred < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_unpublished(&self) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE was_published = FALSE")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ConsumedMessageStore for PgOutboxStore {
    async fn has_consumed(
        &self,
        tx: &mut Self::Tx,
        key: &ConsumedMessage,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM consumed_messages
                WHERE consumer_type = $1 AND message_id = $2
            )
            "#,
        )
        .bind(&key.consumer_type)
        .bind(key.message_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    async fn record_consumed(
        &self,
        tx: &mut Self::Tx,
        key: &ConsumedMessage,
    ) -> Result<bool, StoreError> {
        // A concurrent duplicate blocks here on the primary key until the
        // first transaction finishes, then inserts nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO consumed_messages (consumer_type, message_id)
            VALUES ($1, $2)
            ON CONFLICT (consumer_type, message_id) DO NOTHING
            "#,
        )
        .bind(&key.consumer_type)
        .bind(key.message_id)
        .execute(&mut **tx)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::raised_row;
    use chrono::Duration;

    // Run with `cargo test -- --ignored` against a scratch database.
    async fn store() -> PgOutboxStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgOutboxStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn purge(store: &PgOutboxStore, ids: &[Uuid]) {
        sqlx::query("DELETE FROM outbox_events WHERE id = ANY($1)")
            .bind(ids)
            .execute(store.pool())
            .await
            .unwrap();
    }

    /// A timestamp no other test run will share.
    fn private_epoch() -> DateTime<Utc> {
        let jitter = (Uuid::new_v4().as_u128() % 1_000_000_000) as i64;
        Utc::now() + Duration::days(365 * 500) + Duration::seconds(jitter * 10)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL at DATABASE_URL"]
    async fn test_fetch_is_oldest_first_and_limited() {
        let store = store().await;
        let base = private_epoch();
        let newest = raised_row(base + Duration::seconds(2), false);
        let oldest = raised_row(base, false);
        let middle = raised_row(base + Duration::seconds(1), false);
        let ids = [newest.id, oldest.id, middle.id];

        let mut tx = store.begin().await.unwrap();
        store
            .append(&mut tx, &[newest.clone(), oldest.clone(), middle.clone()])
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        let after = base - Duration::seconds(1);
        let fetched: Vec<Uuid> = store
            .fetch_unpublished(after, 2)
            .await
            .unwrap()
            .iter()
            .map(|row| row.id)
            .collect();
        assert_eq!(fetched, vec![oldest.id, middle.id]);

        store.mark_published(oldest.id).await.unwrap();
        let fetched: Vec<Uuid> = store
            .fetch_unpublished(after, 10)
            .await
            .unwrap()
            .iter()
            .map(|row| row.id)
            .collect();
        assert_eq!(fetched, vec![middle.id, newest.id]);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.mark_published(missing).await,
            Err(StoreError::NotFound(id)) if id == missing
        ));

        purge(&store, &ids).await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL at DATABASE_URL"]
    async fn test_delete_only_touches_old_published_rows() {
        let store = store().await;
        let base = private_epoch();
        let old_published = raised_row(base, true);
        let old_unpublished = raised_row(base, false);
        let recent_published = raised_row(base + Duration::days(10), true);
        let ids = [old_published.id, old_unpublished.id, recent_published.id];

        let mut tx = store.begin().await.unwrap();
        store
            .append(
                &mut tx,
                &[
                    old_published.clone(),
                    old_unpublished.clone(),
                    recent_published.clone(),
                ],
            )
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        store
            .delete_published_older_than(base + Duration::days(1))
            .await
            .unwrap();

        let remaining: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM outbox_events WHERE id = ANY($1) ORDER BY date_occurred")
                .bind(&ids[..])
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(remaining, vec![old_unpublished.id, recent_published.id]);

        purge(&store, &ids).await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL at DATABASE_URL"]
    async fn test_ledger_insert_is_idempotent() {
        let store = store().await;
        let key = ConsumedMessage::new("PgLedgerTest", Uuid::now_v7());

        let mut tx = store.begin().await.unwrap();
        assert!(!store.has_consumed(&mut tx, &key).await.unwrap());
        assert!(store.record_consumed(&mut tx, &key).await.unwrap());
        assert!(!store.record_consumed(&mut tx, &key).await.unwrap());
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(store.has_consumed(&mut tx, &key).await.unwrap());
        assert!(!store.record_consumed(&mut tx, &key).await.unwrap());
        store.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL at DATABASE_URL"]
    async fn test_duplicate_outbox_id_is_a_plain_conflict() {
        let store = store().await;
        let row = raised_row(private_epoch(), false);

        let mut tx = store.begin().await.unwrap();
        store.append(&mut tx, &[row.clone()]).await.unwrap();
        let result = store.append(&mut tx, &[row.clone()]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        store.rollback(tx).await.unwrap();
    }
}
