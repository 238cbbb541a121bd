//! The canonical event record carried end-to-end through the pipeline.
//!
//! [`Message`] is wire-neutral: providers that cross a network encode it as
//! JSON with a base64 payload field (see [`Message::encode`]). In-process
//! providers move the value through channels without any serialization.

use std::collections::HashMap;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// A single event message.
///
/// The `id` is producer-assigned and must be unique per publish call;
/// downstream consumers rely on it for idempotent processing under
/// at-least-once delivery. The payload is opaque to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque non-empty identifier, unique per publish call.
    pub id: String,
    /// Source wall-clock epoch seconds at creation time.
    pub timestamp: i64,
    /// Free-form origin label.
    pub source: String,
    /// Opaque payload bytes (base64 on the wire).
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
    /// Application metadata; keys unique, order irrelevant.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Creates a message with a fresh v4 UUID id and the current timestamp.
    #[must_use]
    pub fn new(source: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: unix_timestamp(),
            source: source.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry, replacing any previous value for the key.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Serializes the message to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Bytes, TransportError> {
        let data = serde_json::to_vec(self)
            .map_err(|e| TransportError::Serialization(format!("encode failed: {e}")))?;
        Ok(Bytes::from(data))
    }

    /// Deserializes a message from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if the bytes are not a
    /// valid wire-form message.
    pub fn decode(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data)
            .map_err(|e| TransportError::Serialization(format!("decode failed: {e}")))
    }
}

/// Current wall clock as epoch seconds.
#[allow(clippy::cast_possible_wrap)] // epoch seconds fit in i64 far beyond any deployment horizon
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Serde adapter: `Bytes` as a standard-alphabet base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
