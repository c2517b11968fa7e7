/// Failures on the relay byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream is not speaking the relay protocol.
    #[error("invalid frame magic (expected 0x5352 \"SR\")")]
    InvalidMagic,

    /// A frame larger than the configured cap, in either direction.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The envelope could not be serialized.
    #[error("envelope json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer hung up mid-frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

/// Errors raised when an envelope does not map onto a known relay message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The event name is not part of the relay protocol.
    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    /// The event is known but its payload has the wrong shape.
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: &'static str,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, FrameError>;
