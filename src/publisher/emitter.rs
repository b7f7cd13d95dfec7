use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use event_emitter_rs::EventEmitter;

use super::{EventPublisher, PublishError};
use crate::event::{DomainEvent, PayloadCodec};

/// Publishes events to in-process listeners registered on an [`EventEmitter`].
///
/// Listeners are keyed by event type and receive the payload as a `String`:
/// JSON payloads verbatim, binary payloads base64 encoded.
pub struct LocalEmitterPublisher {
    emitter: Mutex<EventEmitter>,
}

impl LocalEmitterPublisher {
    pub fn new(emitter: EventEmitter) -> Self {
        LocalEmitterPublisher {
            emitter: Mutex::new(emitter),
        }
    }
}

#[async_trait]
impl EventPublisher for LocalEmitterPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = match (event.codec, event.payload_str()) {
            (PayloadCodec::Json, Some(text)) => text.to_string(),
            _ => STANDARD.encode(&event.payload),
        };

        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| PublishError::other("event emitter poisoned"))?;
        emitter.emit(&event.event_type, payload);
        Ok(())
    }
}
