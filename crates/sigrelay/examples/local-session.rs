//! Local session example: a relay, a receiver and one initiator in one
//! process, exchanging a message in each direction.
//!
//! Run with:
//!   cargo run --example local-session

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sigrelay::peer::{Initiator, InitiatorConfig, Receiver, ReceiverConfig, ReceiverEvent};
use sigrelay::peer::{RELIABLE, UNRELIABLE};
use sigrelay::relay::{RelayConfig, RelayServer};
use sigrelay::transport::MemoryHub;
use sigrelay::wire::Envelope;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = RelayServer::bind(RelayConfig::default().with_bind(([127, 0, 0, 1], 0).into()))
        .await?
        .with_release_hook(|code| eprintln!("[relay] code {code} released"));
    let addr = server.local_addr()?.to_string();
    tokio::spawn(server.serve());
    eprintln!("[relay] listening on {addr}");

    let hub = MemoryHub::new();
    let mut host = Receiver::new(ReceiverConfig::new(addr.clone(), "PLAY"))
        .register(Arc::new(hub.clone()))
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let guest = Initiator::new(InitiatorConfig::new(addr, "play"))
        .on_close(|reason| eprintln!("[guest] closed: {reason}"))
        .connect(&hub)
        .await?;
    guest.set_on_data(|channel, envelope| {
        eprintln!("[guest] {channel}: {} {}", envelope.event, envelope.payload);
    });
    guest
        .sender(RELIABLE)?
        .send(&Envelope::new("join", json!({"name": "player one"})))?;

    if let Some(ReceiverEvent::InitiatorJoined(joined)) = host.next_event().await {
        eprintln!("[host] initiator {} joined", joined.id());
        joined.set_on_data(|channel, envelope| {
            eprintln!("[host] {channel}: {} {}", envelope.event, envelope.payload);
        });
        joined
            .sender(UNRELIABLE)?
            .send(&Envelope::new("state", json!({"tick": 1})))?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    guest.close();
    if let Some(event) = host.next_event().await {
        eprintln!("[host] {event:?}");
    }
    host.shutdown().await;
    Ok(())
}
