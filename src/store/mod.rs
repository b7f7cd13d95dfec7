//! Outbox storage: the unit of work and the store that hands them out.
//!
//! ```text
//! business code ──► UnitOfWork::insert(OutboxMessage) ──┐
//!               └─► business mutation (same unit) ──────┴─► save_changes()  (one commit)
//!
//! drain loop ──► OutboxStore::claim_pending() ──► publish ──► begin/update/save_changes (per message)
//! ```

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::outbox::{specifications, OutboxMessage};
use crate::specification::Specification;

pub use in_memory::{InMemoryOutboxStore, InMemoryUnitOfWork};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresOutboxStore, PostgresUnitOfWork};

/// A transaction boundary for outbox writes.
///
/// Mutations are staged until [`UnitOfWork::save_changes`], which applies all
/// of them or none. Dropping a unit of work without saving discards it.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Stage a new outbox row.
    async fn insert(&mut self, message: OutboxMessage) -> Result<(), PersistenceError>;

    /// Stage an update. `message.version` must match the stored version.
    async fn update(&mut self, message: OutboxMessage) -> Result<(), PersistenceError>;

    /// Query rows as this unit of work sees them, staged changes included.
    async fn find(
        &mut self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError>;

    /// Commit everything staged; returns the number of affected rows.
    async fn save_changes(&mut self) -> Result<usize, PersistenceError>;
}

/// Parameters for claiming pending rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub lease: Duration,
    pub limit: usize,
    pub max_retries: Option<u32>,
    /// Rows never to return, e.g. those the caller already attempted in this drain.
    pub exclude: Vec<Uuid>,
}

/// Persistent home of outbox rows.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type UnitOfWork: UnitOfWork;

    /// Open a new unit of work.
    async fn begin(&self) -> Result<Self::UnitOfWork, PersistenceError>;

    /// Query committed rows.
    async fn find(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError>;

    /// Query committed, unprocessed rows.
    ///
    /// Stores that can narrow the scan to pending rows should override this;
    /// the default filters the result of [`OutboxStore::find`].
    async fn find_pending(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let pending = self.find(&specifications::pending()).await?;
        Ok(spec.apply(pending.iter()))
    }

    /// Look up the message staged for a domain event.
    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxMessage>, PersistenceError> {
        let found = self.find(&specifications::by_domain_event_id(event_id)).await?;
        Ok(found.into_iter().next())
    }

    /// Atomically lease up to `limit` claimable rows, oldest first.
    ///
    /// A row is claimable when it is unprocessed, has no live lease, and is
    /// under the retry cap. Concurrent callers never receive the same row
    /// while its lease is live.
    async fn claim_pending(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<OutboxMessage>, PersistenceError>;

    /// Drop leases held by `worker_id` on the given rows; returns how many were released.
    async fn release(&self, worker_id: &str, ids: &[Uuid]) -> Result<usize, PersistenceError>;
}
