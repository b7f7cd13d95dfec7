//! In-memory queue for tests and single-process setups.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use super::{EventPublisher, PublishError};
use crate::event::DomainEvent;

/// Append-only in-memory event log.
///
/// Clones share the log and the read position. Use [`InMemoryQueue::new_subscriber`]
/// for an independent consumer of the same log.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    log: Arc<RwLock<Vec<DomainEvent>>>,
    position: Arc<Mutex<usize>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another consumer over the same log, starting from the beginning.
    pub fn new_subscriber(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            position: Arc::new(Mutex::new(0)),
        }
    }

    /// Next unread event for this subscriber.
    pub fn poll(&self) -> Result<Option<DomainEvent>, PublishError> {
        let log = self
            .log
            .read()
            .map_err(|_| PublishError::other("queue log poisoned"))?;
        let mut pos = self
            .position
            .lock()
            .map_err(|_| PublishError::other("queue position poisoned"))?;

        if *pos < log.len() {
            let event = log[*pos].clone();
            *pos += 1;
            Ok(Some(event))
        } else {
            Ok(None)
        }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.log.read().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_all_by_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryQueue {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        self.log
            .write()
            .map_err(|_| PublishError::other("queue log poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
