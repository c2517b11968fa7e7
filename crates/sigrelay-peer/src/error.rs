/// Errors that can occur in signaling operations.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Could not reach the relay.
    #[error("failed to connect to relay at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Frame-level error on the relay connection.
    #[error("frame error: {0}")]
    Frame(#[from] sigrelay_wire::FrameError),

    /// Peer transport error.
    #[error("transport error: {0}")]
    Transport(#[from] sigrelay_transport::TransportError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The relay has no receiver registered under the code.
    #[error("no receiver registered under '{receiver_id}'")]
    NotFound { receiver_id: String },

    /// A required channel failed before the session was ready.
    #[error("channel failed: {0}")]
    ChannelFailed(String),

    /// The relay connection went away.
    #[error("relay disconnected: {0}")]
    Disconnected(String),

    /// The channel is not part of the session, or is reserved.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// A channel set that cannot be used for a session.
    #[error("invalid channel set: {0}")]
    InvalidChannelSet(String),

    /// A configuration value the client cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session or client has been closed.
    #[error("session closed")]
    Closed,
}

impl SignalError {
    /// True for the relay's answer to an offer addressed to an unknown code.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SignalError>;
