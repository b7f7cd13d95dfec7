//! Transactional outbox for domain events.
//!
//! Events are staged with [`OutboxService::save_events`] in the same
//! [`UnitOfWork`] as the business change that raised them, then delivered by
//! [`OutboxService::process_outbox_messages`] (or a background
//! [`OutboxWorker`]) to an [`EventPublisher`] with at-least-once semantics.

pub mod config;
pub mod error;
pub mod event;
pub mod outbox;
pub mod publisher;
pub mod specification;
pub mod store;

pub use config::{ConfigError, OutboxConfig};
pub use error::{OutboxError, PersistenceError, ValidationError};
pub use event::{DomainEvent, EventPayload, PayloadCodec, SerializationError};
pub use outbox::{specifications, DrainResult, OutboxMessage, OutboxService, OutboxWorker, WorkerStats};
#[cfg(feature = "emitter")]
pub use publisher::LocalEmitterPublisher;
pub use publisher::{Deduplicator, EventPublisher, InMemoryQueue, LogPublisher, PublishError};
pub use specification::Specification;
#[cfg(feature = "postgres")]
pub use store::{PostgresOutboxStore, PostgresUnitOfWork};
pub use store::{ClaimRequest, InMemoryOutboxStore, InMemoryUnitOfWork, OutboxStore, UnitOfWork};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
pub use tokio_util::sync::CancellationToken;
