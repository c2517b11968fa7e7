//! Signaling clients.
//!
//! Two roles meet through the relay:
//! - the **receiver** registers a short code and accepts any number of
//!   initiators ([`Receiver`]);
//! - an **initiator** knows the code and drives one connection attempt to
//!   ready ([`Initiator`]).
//!
//! Both sides create their direct connection through a
//! [`sigrelay_transport::PeerTransport`], wait until every required channel
//! is open, and then hand the application a small capability handle. After
//! that the receiver keeps probing each initiator over the reserved
//! `internal` channel and reports departures.

pub mod channels;
pub mod control;
pub mod error;
pub mod handle;
pub mod initiator;
pub mod link;
pub mod receiver;
pub mod session;

#[cfg(test)]
mod testing;

pub use channels::{ChannelSet, INTERNAL, RELIABLE, UNRELIABLE};
pub use error::{Result, SignalError};
pub use handle::{ChannelSender, DataHandler};
pub use initiator::{Initiator, InitiatorConfig, InitiatorHandle};
pub use link::{RelayLink, RelaySender};
pub use receiver::{
    JoinedInitiator, Receiver, ReceiverConfig, ReceiverEvent, ReceiverHandle,
    DEFAULT_HEARTBEAT_INTERVAL,
};
pub use session::SessionState;
