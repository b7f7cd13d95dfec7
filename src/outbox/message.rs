use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DomainEvent, PayloadCodec, SerializationError};

/// Persisted projection of a [`DomainEvent`].
///
/// The id is the originating event's id, so a store holds at most one
/// message per event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub event_type: String,
    #[serde(default)]
    pub codec: PayloadCodec,
    #[serde(with = "crate::event::payload_serde")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Insertion order assigned by the store; breaks ties on `created_at`.
    #[serde(default)]
    pub sequence: u64,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on every update.
    #[serde(default)]
    pub version: u64,
}

impl OutboxMessage {
    /// Stage a message for `event`, created now.
    pub fn from_event(event: DomainEvent) -> Self {
        Self::from_event_at(event, Utc::now())
    }

    pub fn from_event_at(event: DomainEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            codec: event.codec,
            payload: event.payload,
            metadata: event.metadata,
            occurred_at: event.occurred_at,
            created_at,
            sequence: 0,
            processed: false,
            processed_at: None,
            retry_count: 0,
            last_error: None,
            locked_by: None,
            locked_until: None,
            version: 0,
        }
    }

    /// Rebuild the domain event for publishing.
    ///
    /// Fails when the stored payload does not match its declared codec.
    pub fn to_domain_event(&self) -> Result<DomainEvent, SerializationError> {
        if self.event_type.trim().is_empty() {
            return Err(SerializationError::new(
                self.codec,
                format!("outbox message {} has no event type", self.id),
            ));
        }
        self.codec.check(&self.payload)?;

        Ok(DomainEvent {
            id: self.id,
            event_type: self.event_type.clone(),
            codec: self.codec,
            payload: self.payload.clone(),
            occurred_at: self.occurred_at,
            metadata: self.metadata.clone(),
        })
    }

    pub fn is_pending(&self) -> bool {
        !self.processed
    }

    /// Whether another worker currently holds an unexpired claim.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// Pending, not claimed (or claim expired), and under the retry cap.
    pub fn is_claimable_at(&self, now: DateTime<Utc>, max_retries: Option<u32>) -> bool {
        self.is_pending()
            && !self.is_locked_at(now)
            && max_retries.map_or(true, |max| self.retry_count < max)
    }

    pub fn claim(&mut self, worker_id: impl Into<String>, lease: Duration, now: DateTime<Utc>) {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        self.locked_by = Some(worker_id.into());
        self.locked_until = Some(now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.processed = true;
        self.processed_at = Some(now);
        self.release();
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = if error.is_empty() { None } else { Some(error) };
        self.release();
    }

    /// Drop the claim without touching delivery state.
    pub fn release(&mut self) {
        self.locked_by = None;
        self.locked_until = None;
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta("correlation_id")
    }
}

impl From<DomainEvent> for OutboxMessage {
    fn from(event: DomainEvent) -> Self {
        OutboxMessage::from_event(event)
    }
}
