//! Envelope framing for the sigrelay signaling protocol.
//!
//! Every relay message is one [`Envelope`] (`{event, payload}`) encoded as
//! JSON and framed on the byte stream with:
//! - A 2-byte magic number ("SR") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! [`EnvelopeCodec`] plugs the framing into `tokio_util::codec`, so relay
//! endpoints only ever see whole envelopes.

pub mod code;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod message;

pub use codec::{
    decode_frame, encode_frame, EnvelopeCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use envelope::{event, Envelope};
pub use error::{FrameError, MessageError, Result};
pub use identity::{pretty_id, ShortId};
pub use message::{FromRelay, ToRelay};
