use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A payload could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{codec} serialization failed: {message}")]
pub struct SerializationError {
    pub codec: PayloadCodec,
    pub message: String,
}

impl SerializationError {
    pub fn new(codec: PayloadCodec, message: impl Into<String>) -> Self {
        Self {
            codec,
            message: message.into(),
        }
    }
}

/// Wire format of an event payload.
///
/// Stored next to every outbox message so the drain loop can decode payloads
/// without knowing which codec the producer picked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCodec {
    /// Self-describing JSON.
    #[default]
    Json,
    /// Compact binary via `bitcode`.
    Bitcode,
}

impl PayloadCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadCodec::Json => "json",
            PayloadCodec::Bitcode => "bitcode",
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        match self {
            PayloadCodec::Json => {
                serde_json::to_vec(value).map_err(|e| SerializationError::new(*self, e.to_string()))
            }
            PayloadCodec::Bitcode => {
                bitcode::serialize(value).map_err(|e| SerializationError::new(*self, e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        match self {
            PayloadCodec::Json => {
                serde_json::from_slice(bytes).map_err(|e| SerializationError::new(*self, e.to_string()))
            }
            PayloadCodec::Bitcode => {
                bitcode::deserialize(bytes).map_err(|e| SerializationError::new(*self, e.to_string()))
            }
        }
    }

    /// Cheap structural check used before handing a stored payload to a publisher.
    ///
    /// Bitcode is not self-describing, so only JSON payloads can be verified
    /// without knowing the target type.
    pub fn check(&self, bytes: &[u8]) -> Result<(), SerializationError> {
        match self {
            PayloadCodec::Json => serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
                .map(|_| ())
                .map_err(|e| SerializationError::new(*self, e.to_string())),
            PayloadCodec::Bitcode => Ok(()),
        }
    }
}

impl fmt::Display for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(PayloadCodec::Json),
            "bitcode" => Ok(PayloadCodec::Bitcode),
            other => Err(format!("unknown payload codec: {other}")),
        }
    }
}
