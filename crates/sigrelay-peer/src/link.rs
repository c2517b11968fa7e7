use futures_util::{SinkExt, StreamExt};
use sigrelay_wire::{Envelope, EnvelopeCodec, FrameConfig};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::error::{Result, SignalError};

/// Cloneable sending half of a [`RelayLink`].
#[derive(Debug, Clone)]
pub struct RelaySender {
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl RelaySender {
    /// Queue a message for the relay.
    pub fn send(&self, message: impl Into<Envelope>) -> Result<()> {
        self.outbox
            .send(message.into())
            .map_err(|_| SignalError::Disconnected("relay connection closed".to_string()))
    }
}

/// A client's connection to the relay, reduced to two envelope queues.
///
/// Over TCP a reader task and a writer task move envelopes between the queues
/// and the framed socket. Both tasks stop when the link is dropped.
#[derive(Debug)]
pub struct RelayLink {
    sender: RelaySender,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayLink {
    /// Connect to a relay at `addr` (`host:port`).
    pub async fn connect(addr: &str, config: FrameConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SignalError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        tracing::debug!(addr = %addr, "connected to relay");

        let (mut sink, mut frames) = Framed::new(stream, EnvelopeCodec::with_config(config)).split();
        let (outbox, mut queue) = mpsc::unbounded_channel::<Envelope>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(envelope) = queue.recv().await {
                if let Err(err) = sink.send(envelope).await {
                    tracing::warn!(error = %err, "relay write failed");
                    break;
                }
            }
        });
        let reader = tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                match item {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "relay read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            sender: RelaySender { outbox },
            inbound,
            tasks: vec![writer, reader],
        })
    }

    /// Two links wired back to back.
    ///
    /// Whatever one end sends the other receives. Used to run clients against
    /// an in-process relay.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::from_channels(a_tx, b_rx), Self::from_channels(b_tx, a_rx))
    }

    /// Link over caller-provided queues.
    pub fn from_channels(
        outbox: mpsc::UnboundedSender<Envelope>,
        inbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            sender: RelaySender { outbox },
            inbound,
            tasks: Vec::new(),
        }
    }

    pub fn send(&self, message: impl Into<Envelope>) -> Result<()> {
        self.sender.send(message)
    }

    pub fn sender(&self) -> RelaySender {
        self.sender.clone()
    }

    /// Next envelope from the relay; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    /// Stop the I/O tasks. Pending outbound envelopes are dropped.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.inbound.close();
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.close();
    }
}
