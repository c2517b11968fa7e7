use std::sync::Arc;

use parking_lot::Mutex;
use sigrelay_transport::PeerTransport;
use sigrelay_wire::Envelope;

use crate::channels::{is_internal, ChannelSet};
use crate::error::{Result, SignalError};

/// Callback for application messages: channel label and envelope.
pub type DataHandler = Arc<dyn Fn(&str, Envelope) + Send + Sync>;

/// Messages kept while no handler is installed.
const MAX_PENDING: usize = 256;

/// Sender bound to one named channel of a session.
#[derive(Clone)]
pub struct ChannelSender {
    transport: Arc<dyn PeerTransport>,
    label: String,
}

impl ChannelSender {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send one envelope as JSON text.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.to_text()?;
        self.transport.send(&self.label, &text)?;
        Ok(())
    }
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("label", &self.label)
            .finish()
    }
}

/// Resolve an application-facing sender. The reserved channel is refused.
pub(crate) fn channel_sender(
    transport: &Arc<dyn PeerTransport>,
    channels: &ChannelSet,
    label: &str,
) -> Result<ChannelSender> {
    if is_internal(label) || !channels.contains(label) {
        return Err(SignalError::UnknownChannel(label.to_string()));
    }
    Ok(ChannelSender {
        transport: Arc::clone(transport),
        label: label.to_string(),
    })
}

/// Shared slot holding the application's data handler.
///
/// Messages dispatched before a handler is installed are queued and replayed
/// when it arrives. Messages dispatched during the replay join the queue, so
/// the handler sees them in arrival order.
#[derive(Clone, Default)]
pub(crate) struct HandlerSlot {
    inner: Arc<Mutex<SlotInner>>,
}

#[derive(Default)]
struct SlotInner {
    handler: Option<DataHandler>,
    pending: Vec<(String, Envelope)>,
    replaying: bool,
}

impl HandlerSlot {
    pub(crate) fn set(&self, handler: DataHandler) {
        {
            let mut inner = self.inner.lock();
            inner.handler = Some(handler);
            if inner.replaying {
                return;
            }
            inner.replaying = true;
        }

        loop {
            let (handler, batch) = {
                let mut inner = self.inner.lock();
                match inner.handler.clone() {
                    Some(handler) if !inner.pending.is_empty() => {
                        (handler, std::mem::take(&mut inner.pending))
                    }
                    _ => {
                        inner.replaying = false;
                        return;
                    }
                }
            };
            for (label, envelope) in batch {
                handler(&label, envelope);
            }
        }
    }

    pub(crate) fn dispatch(&self, label: &str, envelope: Envelope) {
        let handler = {
            let mut inner = self.inner.lock();
            match inner.handler.clone() {
                Some(handler) if !inner.replaying => handler,
                Some(_) => {
                    inner.pending.push((label.to_string(), envelope));
                    return;
                }
                None => {
                    if inner.pending.len() < MAX_PENDING {
                        inner.pending.push((label.to_string(), envelope));
                    } else {
                        tracing::warn!(channel = %label, "no data handler installed, dropping message");
                    }
                    return;
                }
            }
        };
        handler(label, envelope);
    }
}
