/// Errors that can occur in peer transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A session description could not be understood.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// The description refers to an endpoint that does not exist (any more).
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    /// The named channel does not exist or is not open.
    #[error("channel '{0}' is not open")]
    ChannelNotOpen(String),

    /// A channel with this label was already created.
    #[error("channel '{0}' already exists")]
    DuplicateChannel(String),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// Failure reported by the platform transport.
    #[error("platform transport error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
