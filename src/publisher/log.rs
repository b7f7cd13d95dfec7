use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};

use super::{EventPublisher, PublishError};
use crate::event::{DomainEvent, PayloadCodec};

/// A publisher that writes events to the log, and optionally to a buffer.
#[derive(Clone, Default)]
pub struct LogPublisher {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogPublisher {
    pub fn new() -> Self {
        LogPublisher { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogPublisher {
            buffer: Some(buffer),
        }
    }

    fn render(event: &DomainEvent) -> String {
        let payload = match (event.codec, event.payload_str()) {
            (PayloadCodec::Json, Some(text)) => text.to_string(),
            _ => STANDARD.encode(&event.payload),
        };
        let meta = if event.metadata.is_empty() {
            String::new()
        } else {
            let mut pairs: Vec<_> = event.metadata.iter().collect();
            pairs.sort();
            format!(" meta={:?}", pairs)
        };
        format!("[OUTBOX] {} {} {}{}", event.id, event.event_type, payload, meta)
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let line = Self::render(event);
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            codec = %event.codec,
            "{}",
            line
        );

        if let Some(buffer) = &self.buffer {
            let mut buffer = buffer
                .lock()
                .map_err(|_| PublishError::other("log publisher buffer poisoned"))?;
            buffer.push(line);
        }
        Ok(())
    }
}
