use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque session description (offer or answer). Relayed, never inspected.
pub type SessionDescription = Value;

/// Opaque connectivity candidate. Relayed, never inspected.
pub type Candidate = Value;

/// Delivery properties of a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub label: String,
    pub ordered: bool,
    /// `None` means fully reliable.
    pub max_retransmits: Option<u16>,
}

impl ChannelSpec {
    /// Ordered channel with unlimited retransmits.
    pub fn reliable(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ordered: true,
            max_retransmits: None,
        }
    }

    /// Unordered channel that never retransmits.
    pub fn unreliable(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ordered: false,
            max_retransmits: Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Progress reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local candidate to trickle to the remote side. `None` marks the end
    /// of gathering.
    LocalCandidate(Option<Candidate>),
    /// The named channel is open in both directions.
    ChannelOpen(String),
    /// Text received on the named channel.
    ChannelMessage { label: String, data: String },
    /// The named channel closed, locally or remotely.
    ChannelClosed(String),
    /// The transport failed; no further progress is possible.
    Error(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One direct peer connection, as seen by a signaling client.
///
/// The initiator creates its channels, calls [`create_offer`] and later
/// [`apply_answer`]. The receiver only calls [`accept_offer`]; the channels
/// the initiator created show up as [`TransportEvent::ChannelOpen`].
///
/// [`create_offer`]: PeerTransport::create_offer
/// [`apply_answer`]: PeerTransport::apply_answer
/// [`accept_offer`]: PeerTransport::accept_offer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Declare a channel. Must be called before [`create_offer`](Self::create_offer).
    fn create_channel(&self, spec: &ChannelSpec) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer and produce the matching answer.
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: Candidate) -> Result<()>;

    /// Send text on an open channel.
    fn send(&self, label: &str, data: &str) -> Result<()>;

    /// State of a channel, `None` if this side never saw it.
    fn channel_state(&self, label: &str) -> Option<ChannelState>;

    /// Close every channel and release the connection. Idempotent.
    fn close(&self);
}

/// Produces a fresh transport per session.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents)>;
}
