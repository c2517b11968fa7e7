//! Initiator (controller) side of the signaling protocol.
//!
//! One connection attempt is one actor task:
//!
//! ```text
//! Init -> OfferSent -> AnswerApplied -> ChannelsOpening -> Ready
//!   \__________\______________\_______________\____-> Failed
//! ```
//!
//! The caller awaits the transition to `Ready` (or `Failed`). After that the
//! task stays alive to answer heartbeats and route data until the session
//! closes.

use std::collections::HashSet;
use std::sync::Arc;

use sigrelay_transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use sigrelay_wire::code::normalize;
use sigrelay_wire::{
    pretty_id, Envelope, FrameConfig, FromRelay, MessageError, ShortId, ToRelay, DEFAULT_MAX_PAYLOAD,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::channels::{is_internal, ChannelSet, INTERNAL};
use crate::control::{self, Inbound};
use crate::error::{Result, SignalError};
use crate::handle::{channel_sender, ChannelSender, HandlerSlot};
use crate::link::RelayLink;

/// Initiator configuration.
#[derive(Debug, Clone)]
pub struct InitiatorConfig {
    /// Relay address, `host:port`.
    pub relay_addr: String,
    /// Code of the receiver to join.
    pub receiver_id: String,
    /// Channels created on the transport; all must open before ready.
    pub channels: ChannelSet,
    pub max_payload_size: usize,
}

impl InitiatorConfig {
    pub fn new(relay_addr: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            receiver_id: receiver_id.into(),
            channels: ChannelSet::standard(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }

    pub fn with_channels(mut self, channels: ChannelSet) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

type CloseCallback = Box<dyn FnOnce(&str) + Send>;

/// Builder for one connection attempt.
pub struct Initiator {
    config: InitiatorConfig,
    on_close: Option<CloseCallback>,
}

impl Initiator {
    pub fn new(config: InitiatorConfig) -> Self {
        Self {
            config,
            on_close: None,
        }
    }

    /// Callback fired once, with a reason, when a ready session closes.
    ///
    /// Not fired for attempts that never became ready; those fail `connect`.
    pub fn on_close(mut self, callback: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Connect to the relay and run the attempt to ready.
    ///
    /// There is no signaling timeout; wrap this in one if needed. Dropping the
    /// future cancels the attempt and tears everything down.
    pub async fn connect(self, factory: &dyn TransportFactory) -> Result<InitiatorHandle> {
        let link = RelayLink::connect(&self.config.relay_addr, self.config.frame_config()).await?;
        self.connect_over(link, factory).await
    }

    /// Run the attempt over an existing relay link.
    pub async fn connect_over(
        self,
        link: RelayLink,
        factory: &dyn TransportFactory,
    ) -> Result<InitiatorHandle> {
        let (transport, events) = factory.create()?;
        for spec in self.config.channels.specs() {
            if let Err(err) = transport.create_channel(spec) {
                transport.close();
                return Err(err.into());
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (closed_tx, closed) = watch::channel(false);
        let handlers = HandlerSlot::default();
        let receiver_id = normalize(&self.config.receiver_id);

        let actor = InitiatorActor {
            receiver_id: receiver_id.clone(),
            channels: self.config.channels.clone(),
            link,
            relay_open: true,
            transport: Arc::clone(&transport),
            events,
            commands,
            handlers: handlers.clone(),
            on_close: self.on_close,
            closed: closed_tx,
            phase: Phase::Init,
            own_id: None,
            opened: HashSet::new(),
        };
        tokio::spawn(actor.run(ready_tx));

        let id = ready_rx
            .await
            .map_err(|_| SignalError::Closed)??;

        Ok(InitiatorHandle {
            id,
            receiver_id,
            transport,
            channels: self.config.channels,
            handlers,
            commands: commands_tx,
            closed,
        })
    }
}

enum Command {
    Close,
}

/// Capability for a ready session. Dropping it closes the session.
pub struct InitiatorHandle {
    id: Option<String>,
    receiver_id: String,
    transport: Arc<dyn PeerTransport>,
    channels: ChannelSet,
    handlers: HandlerSlot,
    commands: mpsc::UnboundedSender<Command>,
    closed: watch::Receiver<bool>,
}

impl InitiatorHandle {
    /// Own relay id, once the relay announced it.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Code of the receiver this session joined.
    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    /// Sender bound to `channel`. The reserved channel is not available.
    pub fn sender(&self, channel: &str) -> Result<ChannelSender> {
        channel_sender(&self.transport, &self.channels, channel)
    }

    /// Install the handler for messages from the receiver.
    pub fn set_on_data(&self, handler: impl Fn(&str, Envelope) + Send + Sync + 'static) {
        self.handlers.set(Arc::new(handler));
    }

    /// Close the session. The close callback fires with reason `"closed"`.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the session has closed, for any reason.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for InitiatorHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for InitiatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorHandle")
            .field("id", &self.id)
            .field("receiver_id", &self.receiver_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    OfferSent,
    AnswerApplied,
    ChannelsOpening,
    Ready,
    Failed,
}

/// What the actor does after handling one input.
enum Step {
    Continue,
    Ready,
    Fail(SignalError),
    Close(String),
    /// The caller went away before ready.
    Abandon,
}

type ReadySender = oneshot::Sender<Result<Option<String>>>;

struct InitiatorActor {
    receiver_id: String,
    channels: ChannelSet,
    link: RelayLink,
    relay_open: bool,
    transport: Arc<dyn PeerTransport>,
    events: TransportEvents,
    commands: mpsc::UnboundedReceiver<Command>,
    handlers: HandlerSlot,
    on_close: Option<CloseCallback>,
    closed: watch::Sender<bool>,
    phase: Phase,
    own_id: Option<String>,
    opened: HashSet<String>,
}

impl InitiatorActor {
    async fn run(mut self, ready_tx: ReadySender) {
        let mut ready = Some(ready_tx);

        let mut step = self.start().await;
        loop {
            match step {
                Step::Continue => {}
                Step::Ready => {
                    self.phase = Phase::Ready;
                    tracing::info!(
                        id = %self.own_id.as_deref().map(pretty_id).unwrap_or_default(),
                        code = %self.receiver_id,
                        "session ready"
                    );
                    let delivered = ready
                        .take()
                        .is_some_and(|tx| tx.send(Ok(self.own_id.clone())).is_ok());
                    if !delivered {
                        self.teardown();
                        return;
                    }
                }
                Step::Fail(err) => {
                    self.phase = Phase::Failed;
                    tracing::warn!(code = %self.receiver_id, error = %err, "connection attempt failed");
                    self.teardown();
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(err));
                    }
                    return;
                }
                Step::Close(reason) => {
                    tracing::info!(code = %self.receiver_id, reason = %reason, "session closed");
                    self.teardown();
                    if let Some(callback) = self.on_close.take() {
                        callback(&reason);
                    }
                    return;
                }
                Step::Abandon => {
                    tracing::debug!(code = %self.receiver_id, "connection attempt abandoned");
                    self.teardown();
                    return;
                }
            }

            step = tokio::select! {
                _ = abandoned(&mut ready) => Step::Abandon,
                message = self.link.recv(), if self.relay_open => self.on_relay(message).await,
                Some(event) = self.events.recv() => self.on_transport(event),
                command = self.commands.recv() => match command {
                    Some(Command::Close) => self.closing("closed"),
                    None => self.closing("handle dropped"),
                },
            };
        }
    }

    /// Create the offer and send it to the relay.
    async fn start(&mut self) -> Step {
        let offer = match self.transport.create_offer().await {
            Ok(offer) => offer,
            Err(err) => return Step::Fail(err.into()),
        };
        if let Err(err) = self.link.send(ToRelay::Offer {
            receiver_id: self.receiver_id.clone(),
            offer,
        }) {
            return Step::Fail(err);
        }
        self.phase = Phase::OfferSent;
        tracing::info!(code = %self.receiver_id, "offer sent");
        Step::Continue
    }

    fn closing(&self, reason: &str) -> Step {
        if self.phase == Phase::Ready {
            Step::Close(reason.to_string())
        } else {
            Step::Abandon
        }
    }

    async fn on_relay(&mut self, message: Option<Envelope>) -> Step {
        let Some(envelope) = message else {
            self.relay_open = false;
            if self.phase == Phase::Ready {
                tracing::debug!("relay connection closed after ready");
                return Step::Continue;
            }
            return Step::Fail(SignalError::Disconnected(
                "relay closed before the session was ready".to_string(),
            ));
        };

        let message = match FromRelay::try_from(&envelope) {
            Ok(message) => message,
            Err(MessageError::UnknownEvent(event)) => {
                tracing::warn!(event = %event, "ignoring unknown relay event");
                return Step::Continue;
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed relay message");
                return Step::Continue;
            }
        };

        match message {
            FromRelay::ClientId { id } => {
                tracing::info!(id = %ShortId(&id), "relay assigned id");
                self.own_id = Some(id);
                Step::Continue
            }
            FromRelay::Answer { answer } => {
                if self.phase != Phase::OfferSent {
                    tracing::warn!(phase = ?self.phase, "ignoring unexpected answer");
                    return Step::Continue;
                }
                if let Err(err) = self.transport.apply_answer(answer).await {
                    return Step::Fail(err.into());
                }
                self.phase = Phase::AnswerApplied;
                tracing::debug!(code = %self.receiver_id, "answer applied");
                self.check_barrier()
            }
            FromRelay::ReceiverCandidate { candidate } => {
                if let Err(err) = self.transport.add_candidate(candidate).await {
                    tracing::warn!(error = %err, "failed to add receiver candidate");
                }
                Step::Continue
            }
            FromRelay::NotFound { receiver_id } => Step::Fail(SignalError::NotFound { receiver_id }),
            other => {
                tracing::warn!(event = other.event(), "unexpected relay message for an initiator");
                Step::Continue
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) -> Step {
        match event {
            TransportEvent::LocalCandidate(Some(candidate)) => {
                let sent = self.link.send(ToRelay::InitiatorCandidate {
                    receiver_id: self.receiver_id.clone(),
                    candidate,
                });
                if sent.is_err() {
                    tracing::debug!("relay gone, candidate not sent");
                }
                Step::Continue
            }
            TransportEvent::LocalCandidate(None) => {
                tracing::debug!("candidate gathering complete");
                Step::Continue
            }
            TransportEvent::ChannelOpen(label) => {
                tracing::debug!(channel = %label, "channel open");
                self.opened.insert(label);
                self.check_barrier()
            }
            TransportEvent::ChannelMessage { label, data } => {
                self.on_channel_message(&label, &data);
                Step::Continue
            }
            TransportEvent::ChannelClosed(label) => {
                self.opened.remove(&label);
                if self.phase == Phase::Ready {
                    Step::Close(format!("channel '{label}' closed"))
                } else {
                    Step::Fail(SignalError::ChannelFailed(label))
                }
            }
            TransportEvent::Error(reason) => {
                if self.phase == Phase::Ready {
                    Step::Close(reason)
                } else {
                    Step::Fail(SignalError::ChannelFailed(reason))
                }
            }
        }
    }

    fn check_barrier(&mut self) -> Step {
        match self.phase {
            Phase::AnswerApplied | Phase::ChannelsOpening => {
                if self.channels.is_complete(&self.opened) {
                    Step::Ready
                } else {
                    self.phase = Phase::ChannelsOpening;
                    Step::Continue
                }
            }
            _ => Step::Continue,
        }
    }

    fn on_channel_message(&self, label: &str, data: &str) {
        match control::classify(data) {
            Inbound::Heartbeat => {
                if let Err(err) = self.reply_heartbeat() {
                    tracing::debug!(error = %err, "heartbeat reply not sent");
                }
            }
            Inbound::Data(_) if is_internal(label) => {
                tracing::debug!("ignoring non-heartbeat message on internal channel");
            }
            Inbound::Data(envelope) => self.handlers.dispatch(label, envelope),
            Inbound::Malformed(err) => {
                tracing::warn!(channel = %label, error = %err, "dropping malformed peer message");
            }
        }
    }

    fn reply_heartbeat(&self) -> Result<()> {
        let reply = control::heartbeat_reply(self.own_id.as_deref()).to_text()?;
        self.transport.send(INTERNAL, &reply)?;
        Ok(())
    }

    fn teardown(&mut self) {
        self.transport.close();
        self.link.close();
        self.relay_open = false;
        let _ = self.closed.send(true);
    }
}

/// Resolves when the caller stops waiting for the attempt. Never resolves
/// after ready.
async fn abandoned(ready: &mut Option<ReadySender>) {
    match ready {
        Some(tx) => tx.closed().await,
        None => std::future::pending().await,
    }
}
