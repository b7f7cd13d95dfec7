//! Event publishers: the delivery side of the outbox.
//!
//! The drain loop hands every claimed message to an [`EventPublisher`]. Any
//! error it returns is recorded on the message and retried on a later drain,
//! so implementations only need to report failure, never recover from it.
//!
//! Delivery is at-least-once. Consumers should drop repeats by event id,
//! see [`Deduplicator`].

mod dedup;
#[cfg(feature = "emitter")]
mod emitter;
mod in_memory_queue;
mod log;

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{DomainEvent, SerializationError};

pub use dedup::Deduplicator;
#[cfg(feature = "emitter")]
pub use emitter::LocalEmitterPublisher;
pub use in_memory_queue::InMemoryQueue;
pub use log::LogPublisher;

/// Delivery of one event failed.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Broker or network unreachable.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The broker refused the event.
    #[error("event rejected: {0}")]
    Rejected(String),
    #[error("publish timed out")]
    Timeout,
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("publish error: {0}")]
    Other(Box<dyn StdError + Send + Sync>),
}

impl PublishError {
    pub fn other(message: impl Into<String>) -> Self {
        PublishError::Other(message.into().into())
    }
}

/// Delivers domain events to an external channel.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for Arc<P> {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for Box<P> {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}
