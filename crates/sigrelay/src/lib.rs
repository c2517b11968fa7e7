//! Signaling relay and rendezvous clients for short-code peer sessions.
//!
//! A receiver registers a short code with the relay; initiators that know the
//! code reach it through the relay, exchange session descriptions and
//! candidates, and end up on a direct multi-channel peer transport.
//!
//! # Crate Structure
//!
//! - [`wire`]: relay envelopes, messages and frame codec
//! - [`transport`]: peer transport abstraction and the in-memory implementation
//! - [`relay`]: the rendezvous server (behind `relay` feature)
//! - [`peer`]: initiator and receiver signaling clients (behind `peer` feature)

/// Re-export wire types.
pub mod wire {
    pub use sigrelay_wire::*;
}

/// Re-export transport types.
pub mod transport {
    pub use sigrelay_transport::*;
}

/// Re-export relay types (requires `relay` feature).
#[cfg(feature = "relay")]
pub mod relay {
    pub use sigrelay_relay::*;
}

/// Re-export signaling client types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use sigrelay_peer::*;
}
