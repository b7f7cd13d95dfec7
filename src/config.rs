//! Outbox runtime configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::PayloadCodec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not valid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Settings shared by the drain loop and the background worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Identifies this process in `locked_by`.
    pub worker_id: String,
    /// Maximum rows claimed per drain.
    pub batch_size: usize,
    /// How long a claim stays valid before another worker may take the row.
    #[serde(rename = "lease_ms", with = "duration_ms")]
    pub lease: Duration,
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(rename = "publish_timeout_ms", with = "optional_duration_ms")]
    pub publish_timeout: Option<Duration>,
    /// Rows that failed this many times are no longer claimed. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Codec used by [`crate::OutboxService::encode_event`].
    pub codec: PayloadCodec,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfig {
            worker_id: format!("worker-{}", std::process::id()),
            batch_size: 100,
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            publish_timeout: Some(Duration::from_secs(30)),
            max_retries: None,
            codec: PayloadCodec::Json,
        }
    }
}

impl OutboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::invalid("worker_id", "must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.lease.is_zero() {
            return Err(ConfigError::invalid("lease", "must be greater than zero"));
        }
        if self.publish_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid(
                "publish_timeout",
                "must be greater than zero",
            ));
        }
        if self.max_retries == Some(0) {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        Ok(())
    }

    /// Reads `OUTBOX_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`OutboxConfig::from_env`] with a custom variable source.
    ///
    /// `OUTBOX_PUBLISH_TIMEOUT_MS=0` disables the publish timeout.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = OutboxConfig::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(worker_id) = var("OUTBOX_WORKER_ID") {
            config.worker_id = worker_id.trim().to_string();
        }
        if let Some(raw) = var("OUTBOX_BATCH_SIZE") {
            config.batch_size = parse("OUTBOX_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = var("OUTBOX_LEASE_MS") {
            config.lease = Duration::from_millis(parse("OUTBOX_LEASE_MS", &raw)?);
        }
        if let Some(raw) = var("OUTBOX_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(parse("OUTBOX_POLL_INTERVAL_MS", &raw)?);
        }
        if let Some(raw) = var("OUTBOX_PUBLISH_TIMEOUT_MS") {
            let ms: u64 = parse("OUTBOX_PUBLISH_TIMEOUT_MS", &raw)?;
            config.publish_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(raw) = var("OUTBOX_MAX_RETRIES") {
            config.max_retries = Some(parse("OUTBOX_MAX_RETRIES", &raw)?);
        }
        if let Some(raw) = var("OUTBOX_CODEC") {
            config.codec = raw
                .parse()
                .map_err(|e: String| ConfigError::invalid("OUTBOX_CODEC", e))?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis().min(u64::MAX as u128) as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
