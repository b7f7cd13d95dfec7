use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::codec::{PayloadCodec, SerializationError};

/// A typed event payload that knows its own discriminator.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ClientActivated { client_id: String }
///
/// impl EventPayload for ClientActivated {
///     const EVENT_TYPE: &'static str = "ClientActivated";
/// }
/// ```
pub trait EventPayload: Serialize + DeserializeOwned {
    const EVENT_TYPE: &'static str;
}

/// Something that happened in the domain, ready to be staged in the outbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub event_type: String,
    #[serde(default)]
    pub codec: PayloadCodec,
    #[serde(with = "super::payload_serde")]
    pub payload: Vec<u8>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl DomainEvent {
    /// Create an event with a fresh id from already-serialized bytes.
    pub fn new(event_type: impl Into<String>, codec: PayloadCodec, payload: Vec<u8>) -> Self {
        Self::with_id(Uuid::new_v4(), event_type, codec, payload)
    }

    /// Create an event with an explicit id.
    pub fn with_id(
        id: Uuid,
        event_type: impl Into<String>,
        codec: PayloadCodec,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            codec,
            payload,
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create a JSON event from a string payload.
    pub fn json(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(event_type, PayloadCodec::Json, payload.into().into_bytes())
    }

    /// Serialize a typed payload with JSON.
    pub fn encode<T: EventPayload>(payload: &T) -> Result<Self, SerializationError> {
        Self::encode_with(PayloadCodec::Json, payload)
    }

    /// Serialize a typed payload with the given codec.
    pub fn encode_with<T: EventPayload>(
        codec: PayloadCodec,
        payload: &T,
    ) -> Result<Self, SerializationError> {
        let bytes = codec.encode(payload)?;
        Ok(Self::new(T::EVENT_TYPE, codec, bytes))
    }

    /// Decode the payload into `T`, checking the discriminator first.
    pub fn decode<T: EventPayload>(&self) -> Result<T, SerializationError> {
        if self.event_type != T::EVENT_TYPE {
            return Err(SerializationError::new(
                self.codec,
                format!("expected {} but event is {}", T::EVENT_TYPE, self.event_type),
            ));
        }
        self.codec.decode(&self.payload)
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_meta("correlation_id", id)
    }

    pub fn with_causation_id(self, id: impl Into<String>) -> Self {
        self.with_meta("causation_id", id)
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta("correlation_id")
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.meta("causation_id")
    }
}
