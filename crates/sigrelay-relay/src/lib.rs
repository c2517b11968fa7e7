//! Signaling relay.
//!
//! The relay is the rendezvous point of a sigrelay deployment: receivers
//! register a short code, initiators address offers to that code, and the
//! relay forwards offers, answers and candidates between them. Once the
//! direct peer transport is up the relay is out of the data path.
//!
//! [`Registry`] holds all routing state and is usable on its own;
//! [`RelayServer`] puts it behind a TCP listener speaking the framed envelope
//! protocol from `sigrelay-wire`.

pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use config::{RelayConfig, DEFAULT_PORT};
pub use error::{RelayError, Result};
pub use registry::{Outbox, Registry, Role};
pub use server::{ReleaseHook, RelayServer};
