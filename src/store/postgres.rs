use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{ClaimRequest, OutboxStore, UnitOfWork};
use crate::error::PersistenceError;
use crate::event::PayloadCodec;
use crate::outbox::{specifications, OutboxMessage};
use crate::specification::Specification;

const SELECT_COLUMNS: &str = r#"
    id, event_type, codec, payload, metadata, occurred_at, created_at, sequence,
    processed, processed_at, retry_count, last_error, locked_by, locked_until, version
"#;

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    codec: String,
    payload: Vec<u8>,
    metadata: Json<HashMap<String, String>>,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    sequence: i64,
    processed: bool,
    processed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    locked_by: Option<String>,
    locked_until: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = PersistenceError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let codec: PayloadCodec = row.codec.parse().map_err(PersistenceError::Corrupt)?;
        Ok(OutboxMessage {
            id: row.id,
            event_type: row.event_type,
            codec,
            payload: row.payload,
            metadata: row.metadata.0,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
            sequence: row.sequence.max(0) as u64,
            processed: row.processed,
            processed_at: row.processed_at,
            retry_count: row.retry_count.max(0) as u32,
            last_error: row.last_error,
            locked_by: row.locked_by,
            locked_until: row.locked_until,
            version: row.version.max(0) as u64,
        })
    }
}

fn into_messages(rows: Vec<OutboxRow>) -> Result<Vec<OutboxMessage>, PersistenceError> {
    rows.into_iter().map(OutboxMessage::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

/// Postgres-backed outbox store.
///
/// Claims use `FOR UPDATE SKIP LOCKED` plus lease columns, so concurrent
/// relays partition the pending set and a crashed relay's rows come back once
/// the lease expires.
///
/// `find` reads the whole table before applying the specification; prefer
/// `find_pending` for monitoring queries that only look at unprocessed rows.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled `outbox_messages` migration.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))
    }

    /// Load rows for in-process filtering. Specifications are closures, so
    /// only the `processed` flag is pushed down to SQL.
    async fn scan(&self, pending_only: bool) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let filter = if pending_only { "WHERE processed = FALSE" } else { "" };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_messages {filter} ORDER BY created_at ASC, sequence ASC"
        );
        let rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        into_messages(rows)
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    type UnitOfWork = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork, PersistenceError> {
        let tx = self.pool.begin().await?;
        Ok(PostgresUnitOfWork {
            pool: self.pool.clone(),
            tx: Some(tx),
            affected: 0,
        })
    }

    async fn find(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let rows = self.scan(false).await?;
        Ok(spec.apply(rows.iter()))
    }

    async fn find_pending(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let rows = self.scan(true).await?;
        Ok(spec.apply(rows.iter()))
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxMessage>, PersistenceError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_messages WHERE id = $1");
        let row = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OutboxMessage::try_from).transpose()
    }

    async fn claim_pending(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(request.lease).unwrap_or(chrono::Duration::MAX);
        let until = now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let max_retries = request.max_retries.map(|max| max.min(i32::MAX as u32) as i32);

        let sql = format!(
            r#"
            UPDATE outbox_messages
            SET locked_by = $1, locked_until = $2, version = version + 1
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE processed = FALSE
                  AND (locked_until IS NULL OR locked_until <= $3)
                  AND ($4::INT IS NULL OR retry_count < $4)
                  AND NOT (id = ANY($6))
                ORDER BY created_at ASC, sequence ASC
                LIMIT $5
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(&request.worker_id)
            .bind(until)
            .bind(now)
            .bind(max_retries)
            .bind(request.limit.min(i64::MAX as usize) as i64)
            .bind(&request.exclude)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order
        let mut claimed = into_messages(rows)?;
        claimed.sort_by(specifications::oldest_first);
        Ok(claimed)
    }

    async fn release(&self, worker_id: &str, ids: &[Uuid]) -> Result<usize, PersistenceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET locked_by = NULL, locked_until = NULL, version = version + 1
            WHERE id = ANY($1) AND locked_by = $2 AND processed = FALSE
            "#,
        )
        .bind(ids)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Unit of work backed by a Postgres transaction.
///
/// Statements run inside the transaction as they are staged, so constraint
/// violations can surface from `insert` as well as from `save_changes`. Use
/// [`PostgresUnitOfWork::transaction`] to run business statements in the
/// same transaction.
pub struct PostgresUnitOfWork {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    affected: usize,
}

impl PostgresUnitOfWork {
    /// The underlying transaction, opened lazily after a commit.
    pub async fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>, PersistenceError> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| PersistenceError::Unavailable("transaction closed".into()))
    }

    pub async fn rollback(&mut self) -> Result<(), PersistenceError> {
        self.affected = 0;
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn insert(&mut self, message: OutboxMessage) -> Result<(), PersistenceError> {
        let tx = self.transaction().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, event_type, codec, payload, metadata, occurred_at, created_at,
                processed, processed_at, retry_count, last_error, locked_by, locked_until, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0)
            "#,
        )
        .bind(message.id)
        .bind(&message.event_type)
        .bind(message.codec.as_str())
        .bind(&message.payload)
        .bind(Json(&message.metadata))
        .bind(message.occurred_at)
        .bind(message.created_at)
        .bind(message.processed)
        .bind(message.processed_at)
        .bind(message.retry_count.min(i32::MAX as u32) as i32)
        .bind(&message.last_error)
        .bind(&message.locked_by)
        .bind(message.locked_until)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(done) => {
                self.affected += done.rows_affected() as usize;
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => Err(PersistenceError::DuplicateId(message.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&mut self, message: OutboxMessage) -> Result<(), PersistenceError> {
        let tx = self.transaction().await?;
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET processed = $3, processed_at = $4, retry_count = $5, last_error = $6,
                locked_by = $7, locked_until = $8, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(message.id)
        .bind(message.version.min(i64::MAX as u64) as i64)
        .bind(message.processed)
        .bind(message.processed_at)
        .bind(message.retry_count.min(i32::MAX as u32) as i32)
        .bind(&message.last_error)
        .bind(&message.locked_by)
        .bind(message.locked_until)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 1 {
            self.affected += 1;
            return Ok(());
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM outbox_messages WHERE id = $1")
            .bind(message.id)
            .fetch_optional(&mut **tx)
            .await?;

        match actual {
            None => Err(PersistenceError::NotFound(message.id)),
            Some(actual) => Err(PersistenceError::ConcurrentWrite {
                id: message.id,
                expected: message.version,
                actual: actual.max(0) as u64,
            }),
        }
    }

    async fn find(
        &mut self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let tx = self.transaction().await?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_messages ORDER BY created_at ASC, sequence ASC");
        let rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .fetch_all(&mut **tx)
            .await?;
        let messages = into_messages(rows)?;
        Ok(spec.apply(messages.iter()))
    }

    async fn save_changes(&mut self) -> Result<usize, PersistenceError> {
        let affected = std::mem::take(&mut self.affected);
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(affected)
    }
}
