//! Peer transport abstraction.
//!
//! The signaling clients never talk to a real peer-to-peer stack directly.
//! They drive a [`PeerTransport`]: create named channels, produce and apply
//! session descriptions, feed candidates, and send text on an open channel.
//! Progress is reported back as [`TransportEvent`]s on an unbounded queue.
//!
//! [`MemoryHub`] links transports inside one process and is what the tests
//! and the `sigrelay demo` command run on.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryHub, MemoryTransport};
pub use traits::{
    Candidate, ChannelSpec, ChannelState, PeerTransport, SessionDescription, TransportEvent,
    TransportEvents, TransportFactory,
};
