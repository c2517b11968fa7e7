use std::net::SocketAddr;

/// Errors that can occur while running the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred on the listening socket.
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
