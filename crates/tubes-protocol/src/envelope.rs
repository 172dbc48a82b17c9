//! Envelope types for the tubes protocol.
//!
//! Every exchange between a client and the server is one JSON envelope
//! carrying a type, the channel path it is addressed to and an opaque payload.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

use crate::codec::ProtocolError;

/// Envelope type identifiers.
///
/// Unrecognized type strings are kept verbatim in [`MessageType::Unknown`]
/// so that decoding succeeds and the router can report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    Message,
    Unknown(String),
}

impl MessageType {
    /// Get the wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Message => "message",
            MessageType::Unknown(other) => other,
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown(String::new())
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "subscribe" => MessageType::Subscribe,
            "unsubscribe" => MessageType::Unsubscribe,
            "message" => MessageType::Message,
            _ => MessageType::Unknown(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> String {
        match kind {
            MessageType::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol envelope.
///
/// The payload is held as raw JSON so it reaches handlers byte-for-byte as
/// the sender wrote it. A missing payload and an explicit `null` both decode
/// to `None`; `None` encodes as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope type.
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    /// Channel path the envelope is addressed to.
    #[serde(default)]
    pub channel: String,
    /// Raw JSON payload.
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Create a new envelope without payload.
    #[must_use]
    pub fn new(kind: MessageType, channel: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            payload: None,
        }
    }

    /// Create a new Subscribe envelope.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::new(MessageType::Subscribe, channel)
    }

    /// Create a new Unsubscribe envelope.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::new(MessageType::Unsubscribe, channel)
    }

    /// Create a new channel Message envelope from raw JSON bytes.
    ///
    /// An empty payload is sent as `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is not a valid UTF-8 JSON document.
    pub fn message(channel: impl Into<String>, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::new(MessageType::Message, channel).with_payload(payload)
    }

    /// Attach a raw JSON payload. An empty slice means no payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is not a valid UTF-8 JSON document.
    pub fn with_payload(mut self, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.is_empty() {
            self.payload = None;
            return Ok(self);
        }
        let text = std::str::from_utf8(payload)?;
        self.payload = Some(RawValue::from_string(text.to_owned())?);
        Ok(self)
    }

    /// Attach any serializable value as payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, ProtocolError> {
        self.payload = Some(serde_json::value::to_raw_value(value)?);
        Ok(self)
    }

    /// Get the raw payload bytes, if any.
    #[must_use]
    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|raw| raw.get().as_bytes())
    }

    /// Deserialize the payload into a typed value.
    ///
    /// A missing payload is deserialized from `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit `T`.
    pub fn payload_as<'a, T: Deserialize<'a>>(&'a self) -> Result<T, ProtocolError> {
        let raw = self.payload.as_ref().map_or("null", |raw| raw.get());
        Ok(serde_json::from_str(raw)?)
    }
}

/// Wire form of an error delivered to a client.
///
/// Errors travel inside ordinary `message` envelopes addressed to the path
/// the failure happened on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable description.
    pub description: String,
    /// Nested errors of an aggregate failure.
    #[serde(default)]
    pub errors: Vec<ErrorPayload>,
}

impl ErrorPayload {
    /// Create a new error payload without children.
    #[must_use]
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            errors: Vec::new(),
        }
    }
}
