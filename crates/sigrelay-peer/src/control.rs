//! Messages on the reserved `internal` channel.
//!
//! The receiver probes with a bare `HEARTBEAT`; the initiator answers with a
//! `HEARTBEAT` carrying its relay id. Either way a heartbeat is consumed by
//! the client and never reaches the application.

use serde_json::Value;
use sigrelay_wire::{event, Envelope};

/// Probe sent by the receiver's liveness sweep.
pub fn heartbeat_probe() -> Envelope {
    Envelope::event(event::HEARTBEAT)
}

/// Initiator reply, carrying its own relay id when known.
pub fn heartbeat_reply(own_id: Option<&str>) -> Envelope {
    let payload = own_id.map_or(Value::Null, |id| Value::String(id.to_string()));
    Envelope::new(event::HEARTBEAT, payload)
}

/// Text received on a peer channel, sorted by what the client does with it.
#[derive(Debug)]
pub enum Inbound {
    Heartbeat,
    Data(Envelope),
    Malformed(serde_json::Error),
}

pub fn classify(text: &str) -> Inbound {
    match Envelope::from_text(text) {
        Ok(envelope) if envelope.is(event::HEARTBEAT) => Inbound::Heartbeat,
        Ok(envelope) => Inbound::Data(envelope),
        Err(err) => Inbound::Malformed(err),
    }
}
