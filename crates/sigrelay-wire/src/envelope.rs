use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names used on the relay connection and on peer channels.
pub mod event {
    /// Receiver registering its code.
    pub const RECEIVER_UPGRADE: &str = "RECEIVER_UPGRADE";
    /// Session offer, initiator to receiver.
    pub const OFFER: &str = "OFFER";
    /// Session answer, receiver to initiator.
    pub const ANSWER: &str = "ANSWER";
    /// Candidate descriptor produced by the initiator.
    pub const INITIATOR_CANDIDATE: &str = "INITIATOR_CANDIDATE";
    /// Candidate descriptor produced by the receiver.
    pub const RECEIVER_CANDIDATE: &str = "RECEIVER_CANDIDATE";
    /// Relay reply to an offer addressed to an unknown code.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// Relay announcement of the id it assigned to a connection.
    pub const CLIENT_ID: &str = "CLIENT_ID";
    /// Liveness probe and reply on the internal peer channel.
    pub const HEARTBEAT: &str = "HEARTBEAT";
}

/// One `{event, payload}` message.
///
/// A missing payload decodes as `null`, and a `null` payload is omitted when
/// encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope with a payload.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Create an envelope without payload.
    pub fn event(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// True if this envelope carries `event`.
    pub fn is(&self, event: &str) -> bool {
        self.event == event
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    /// Encode as JSON bytes.
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Encode as JSON text (peer channel messages are text).
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Decode from JSON text.
    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
