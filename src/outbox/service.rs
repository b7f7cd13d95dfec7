use std::collections::HashSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{specifications, OutboxMessage};
use crate::config::OutboxConfig;
use crate::error::{OutboxError, PersistenceError, ValidationError};
use crate::event::{DomainEvent, EventPayload, SerializationError};
use crate::publisher::{EventPublisher, PublishError};
use crate::specification::Specification;
use crate::store::{ClaimRequest, OutboxStore, UnitOfWork};

/// Outcome of one [`OutboxService::process_outbox_messages`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    /// Rows leased by this drain, across all batches.
    pub claimed: usize,
    /// Claim round trips that returned rows.
    pub batches: usize,
    pub processed: usize,
    /// Rows whose publish or commit failed; they stay pending.
    pub failed: usize,
    /// Claimed rows handed back unstarted because of cancellation.
    pub released: usize,
    pub cancelled: bool,
}

enum Delivery {
    Processed,
    Failed,
}

/// Stages domain events in the caller's unit of work and drains them to a publisher.
///
/// The service holds no state between calls; every row lives in the store.
pub struct OutboxService<S, P> {
    store: S,
    publisher: P,
    config: OutboxConfig,
}

impl<S, P> OutboxService<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self::with_config(store, publisher, OutboxConfig::default())
    }

    pub fn with_config(store: S, publisher: P, config: OutboxConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Serialize a typed payload with the configured codec.
    pub fn encode_event<T: EventPayload>(&self, payload: &T) -> Result<DomainEvent, SerializationError> {
        DomainEvent::encode_with(self.config.codec, payload)
    }
}

impl<S: OutboxStore, P: EventPublisher> OutboxService<S, P> {
    /// Stage one outbox row per event on `uow`.
    ///
    /// Nothing is committed here; the rows land together with whatever else the
    /// caller saves through the same unit of work. If any event is invalid, or
    /// `cancel` fires before staging starts, the call fails before staging
    /// anything. A cancellation seen between inserts stops staging and returns
    /// [`OutboxError::Cancelled`]; the caller should drop the unit of work.
    #[instrument(name = "outbox.save_events", skip_all)]
    pub async fn save_events<I>(
        &self,
        uow: &mut S::UnitOfWork,
        events: I,
        cancel: &CancellationToken,
    ) -> Result<usize, OutboxError>
    where
        I: IntoIterator<Item = DomainEvent>,
    {
        let events: Vec<DomainEvent> = events.into_iter().collect();
        validate(&events)?;

        let created_at = Utc::now();
        let count = events.len();
        for event in events {
            if cancel.is_cancelled() {
                debug!("staging cancelled");
                return Err(OutboxError::Cancelled);
            }
            debug!(event_id = %event.id, event_type = %event.event_type, "staging outbox message");
            uow.insert(OutboxMessage::from_event_at(event, created_at))
                .await?;
        }

        debug!(count, "outbox messages staged");
        Ok(count)
    }

    /// Publish every claimable pending row one at a time, oldest first.
    ///
    /// Rows are claimed in batches of `batch_size` until a claim comes back
    /// empty. Rows this call already attempted are excluded from later claims,
    /// so a failing row is tried at most once per call. Each outcome is
    /// committed before the next message starts. Publish and decode failures
    /// are recorded on the row and never fail the call; only the first claim
    /// does, a later claim error ends the drain early.
    #[instrument(name = "outbox.drain", skip_all, fields(worker_id = %self.config.worker_id))]
    pub async fn process_outbox_messages(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DrainResult, OutboxError> {
        let mut result = DrainResult::default();
        let mut attempted: Vec<Uuid> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let request = ClaimRequest {
                worker_id: self.config.worker_id.clone(),
                lease: self.config.lease,
                limit: self.config.batch_size,
                max_retries: self.config.max_retries,
                exclude: attempted.clone(),
            };
            let claimed = match self.store.claim_pending(&request).await {
                Ok(claimed) => claimed,
                Err(err) if result.batches == 0 => return Err(err.into()),
                Err(err) => {
                    warn!(error = %err, "failed to claim next outbox batch");
                    break;
                }
            };
            if claimed.is_empty() {
                break;
            }
            result.batches += 1;
            result.claimed += claimed.len();
            debug!(claimed = claimed.len(), batch = result.batches, "claimed outbox messages");

            let mut messages = claimed.into_iter();
            while let Some(message) = messages.next() {
                if cancel.is_cancelled() {
                    let mut unstarted = vec![message.id];
                    unstarted.extend(messages.by_ref().map(|m| m.id));
                    result.released += self.release(&unstarted).await;
                    result.cancelled = true;
                    info!(released = result.released, "drain cancelled");
                    break;
                }

                attempted.push(message.id);
                match self.deliver(message).await {
                    Delivery::Processed => result.processed += 1,
                    Delivery::Failed => result.failed += 1,
                }
            }
            if result.cancelled {
                break;
            }
        }

        if result.batches > 0 {
            info!(
                claimed = result.claimed,
                batches = result.batches,
                processed = result.processed,
                failed = result.failed,
                "outbox drain finished"
            );
        }
        Ok(result)
    }

    /// Look up the outbox row staged for a domain event.
    pub async fn find_by_event_id(&self, event_id: Uuid) -> Result<Option<OutboxMessage>, OutboxError> {
        Ok(self.store.get(event_id).await?)
    }

    /// Query committed rows, e.g. [`specifications::failed`] for monitoring.
    pub async fn find(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        Ok(self.store.find(spec).await?)
    }

    /// Query unprocessed rows only; cheaper than [`OutboxService::find`] on
    /// stores that can filter before loading.
    pub async fn find_pending(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        Ok(self.store.find_pending(spec).await?)
    }

    /// Rows that reached the configured retry cap.
    pub async fn dead_letters(&self) -> Result<Vec<OutboxMessage>, OutboxError> {
        match self.config.max_retries {
            Some(max) => self.find_pending(&specifications::exhausted(max)).await,
            None => Ok(Vec::new()),
        }
    }

    async fn deliver(&self, mut message: OutboxMessage) -> Delivery {
        let outcome = match message.to_domain_event() {
            Ok(event) => self.publish(&event).await,
            Err(err) => Err(PublishError::from(err)),
        };

        let delivery = match outcome {
            Ok(()) => {
                message.mark_processed(Utc::now());
                Delivery::Processed
            }
            Err(err) => {
                let error = err.to_string();
                message.record_failure(error.as_str());
                warn!(
                    event_id = %message.id,
                    event_type = %message.event_type,
                    retry_count = message.retry_count,
                    error = %error,
                    "failed to publish outbox message"
                );
                Delivery::Failed
            }
        };

        let id = message.id;
        match self.commit(message).await {
            Ok(()) => {
                if matches!(delivery, Delivery::Processed) {
                    debug!(event_id = %id, "outbox message processed");
                }
                delivery
            }
            Err(err) => {
                // The lease expires and the row is redelivered.
                warn!(event_id = %id, error = %err, "failed to commit outbox message");
                Delivery::Failed
            }
        }
    }

    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        match self.config.publish_timeout {
            Some(limit) => tokio::time::timeout(limit, self.publisher.publish(event))
                .await
                .unwrap_or(Err(PublishError::Timeout)),
            None => self.publisher.publish(event).await,
        }
    }

    async fn commit(&self, message: OutboxMessage) -> Result<(), PersistenceError> {
        let mut uow = self.store.begin().await?;
        uow.update(message).await?;
        uow.save_changes().await?;
        Ok(())
    }

    async fn release(&self, ids: &[Uuid]) -> usize {
        match self.store.release(&self.config.worker_id, ids).await {
            Ok(released) => released,
            Err(err) => {
                warn!(error = %err, "failed to release claimed outbox messages");
                0
            }
        }
    }
}

fn validate(events: &[DomainEvent]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(events.len());
    for event in events {
        if event.id.is_nil() {
            return Err(ValidationError::MissingId);
        }
        if event.event_type.trim().is_empty() {
            return Err(ValidationError::MissingEventType(event.id));
        }
        if !seen.insert(event.id) {
            return Err(ValidationError::DuplicateId(event.id));
        }
    }
    Ok(())
}
