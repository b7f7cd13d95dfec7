use thiserror::Error;
use uuid::Uuid;

/// A domain event was rejected before anything was staged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("domain event has no id")]
    MissingId,
    #[error("domain event {0} has no event type")]
    MissingEventType(Uuid),
    #[error("domain event {0} appears more than once in the same batch")]
    DuplicateId(Uuid),
}

/// The outbox store could not complete an operation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("outbox message {0} already exists")]
    DuplicateId(Uuid),
    #[error("outbox message {0} not found")]
    NotFound(Uuid),
    #[error("concurrent write detected for outbox message {id} (expected version {expected}, got {actual})")]
    ConcurrentWrite { id: Uuid, expected: u64, actual: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored outbox row is corrupt: {0}")]
    Corrupt(String),
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced to callers of [`crate::OutboxService`].
///
/// Publish failures never show up here; the drain loop records them on the
/// message itself.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("operation cancelled")]
    Cancelled,
}
