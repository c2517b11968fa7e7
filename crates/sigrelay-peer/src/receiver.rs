//! Receiver (host) side of the signaling protocol.
//!
//! One actor task owns the session table. It reacts to relay messages,
//! transport events of every session, handle commands and the heartbeat
//! ticker; nothing else mutates a session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sigrelay_transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use sigrelay_wire::code::normalize;
use sigrelay_wire::{
    pretty_id, Envelope, FrameConfig, FromRelay, MessageError, ShortId, ToRelay, DEFAULT_MAX_PAYLOAD,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::channels::{is_internal, ChannelSet, INTERNAL};
use crate::control::{self, Inbound};
use crate::error::{Result, SignalError};
use crate::handle::{channel_sender, ChannelSender, HandlerSlot};
use crate::link::{RelayLink, RelaySender};
use crate::session::{InitiatorSession, Sweep};

/// Interval between liveness sweeps unless configured otherwise.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Relay address, `host:port`.
    pub relay_addr: String,
    /// Code to register under. Normalized to uppercase.
    pub code: String,
    /// Channels an initiator must open before it counts as joined.
    pub channels: ChannelSet,
    /// Liveness sweep period. A silent initiator is dropped within two periods.
    pub heartbeat_interval: Duration,
    pub max_payload_size: usize,
}

impl ReceiverConfig {
    pub fn new(relay_addr: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            code: code.into(),
            channels: ChannelSet::standard(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }

    pub fn with_channels(mut self, channels: ChannelSet) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(SignalError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

/// What the receiver reports to the application.
#[derive(Debug)]
pub enum ReceiverEvent {
    /// Every required channel of a new initiator is open.
    InitiatorJoined(JoinedInitiator),
    /// A joined initiator is gone: heartbeat timeout, channel or transport
    /// failure, or an explicit close. Reported once per join.
    InitiatorLeft(String),
    /// An initiator failed before joining.
    JoinFailed { id: String, reason: String },
    /// The relay connection closed; no new initiators can arrive.
    RelayClosed,
}

#[derive(Debug)]
enum Command {
    Close { id: String },
    Shutdown,
}

/// Capability handed out for a joined initiator.
pub struct JoinedInitiator {
    id: String,
    transport: Arc<dyn PeerTransport>,
    channels: ChannelSet,
    handlers: HandlerSlot,
    commands: mpsc::UnboundedSender<Command>,
}

impl JoinedInitiator {
    /// Relay id of the initiator.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sender bound to `channel`. The reserved channel is not available.
    pub fn sender(&self, channel: &str) -> Result<ChannelSender> {
        channel_sender(&self.transport, &self.channels, channel)
    }

    /// Install the handler for messages from this initiator.
    pub fn set_on_data(&self, handler: impl Fn(&str, Envelope) + Send + Sync + 'static) {
        self.handlers.set(Arc::new(handler));
    }

    /// Drop this initiator. Reported as [`ReceiverEvent::InitiatorLeft`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close {
            id: self.id.clone(),
        });
    }
}

impl std::fmt::Debug for JoinedInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedInitiator")
            .field("id", &self.id)
            .finish()
    }
}

/// Entry point for the receiver role.
pub struct Receiver {
    config: ReceiverConfig,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self { config }
    }

    /// Connect to the relay and register the configured code.
    pub async fn register(self, factory: Arc<dyn TransportFactory>) -> Result<ReceiverHandle> {
        self.config.validate()?;
        let link = RelayLink::connect(&self.config.relay_addr, self.config.frame_config()).await?;
        self.register_over(link, factory)
    }

    /// Register over an existing relay link.
    pub fn register_over(
        self,
        link: RelayLink,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<ReceiverHandle> {
        self.config.validate()?;
        let code = normalize(&self.config.code);
        link.send(ToRelay::ReceiverUpgrade { code: code.clone() })?;
        tracing::info!(code = %code, "registering receiver");

        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (signals_tx, signals) = mpsc::unbounded_channel();

        let actor = ReceiverActor {
            relay: link.sender(),
            link,
            config: self.config,
            factory,
            sessions: HashMap::new(),
            next_epoch: 0,
            own_id: None,
            signals_tx,
            signals,
            commands_tx: commands_tx.clone(),
            commands,
            events: events_tx,
        };
        let task = tokio::spawn(actor.run());

        Ok(ReceiverHandle {
            code,
            events,
            commands: commands_tx,
            task: Some(task),
        })
    }
}

/// Running receiver. Dropping it stops the receiver and closes every session.
#[derive(Debug)]
pub struct ReceiverHandle {
    code: String,
    events: mpsc::UnboundedReceiver<ReceiverEvent>,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    /// Registered code, uppercase.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Next event; `None` after the receiver stopped.
    pub async fn next_event(&mut self) -> Option<ReceiverEvent> {
        self.events.recv().await
    }

    /// Stop the receiver and wait until every session is closed.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct SessionSignal {
    id: String,
    epoch: u64,
    kind: SignalKind,
}

enum SignalKind {
    Transport(TransportEvent),
    AnswerFailed(String),
}

struct ReceiverActor {
    link: RelayLink,
    relay: RelaySender,
    config: ReceiverConfig,
    factory: Arc<dyn TransportFactory>,
    sessions: HashMap<String, InitiatorSession>,
    next_epoch: u64,
    own_id: Option<String>,
    signals_tx: mpsc::UnboundedSender<SessionSignal>,
    signals: mpsc::UnboundedReceiver<SessionSignal>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ReceiverEvent>,
}

impl ReceiverActor {
    async fn run(mut self) {
        let period = self.config.heartbeat_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut relay_open = true;

        loop {
            tokio::select! {
                message = self.link.recv(), if relay_open => match message {
                    Some(envelope) => self.on_relay(envelope),
                    None => {
                        tracing::warn!("relay connection closed");
                        relay_open = false;
                        self.emit(ReceiverEvent::RelayClosed);
                    }
                },
                Some(signal) = self.signals.recv() => self.on_signal(signal),
                _ = ticker.tick() => self.sweep(),
                command = self.commands.recv() => match command {
                    Some(Command::Close { id }) => self.evict(&id, "closed by application"),
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        tracing::info!(
            id = %self.own_id.as_deref().map(pretty_id).unwrap_or_default(),
            sessions = self.sessions.len(),
            "receiver stopping"
        );
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
        self.link.close();
    }

    fn emit(&self, event: ReceiverEvent) {
        let _ = self.events.send(event);
    }

    fn on_relay(&mut self, envelope: Envelope) {
        let message = match FromRelay::try_from(&envelope) {
            Ok(message) => message,
            Err(MessageError::UnknownEvent(event)) => {
                tracing::warn!(event = %event, "ignoring unknown relay event");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed relay message");
                return;
            }
        };

        match message {
            FromRelay::ClientId { id } => {
                tracing::info!(id = %ShortId(&id), code = %normalize(&self.config.code), "registered with relay");
                self.own_id = Some(id);
            }
            FromRelay::Offer {
                initiator_id,
                offer,
            } => self.on_offer(initiator_id, offer),
            FromRelay::InitiatorCandidate {
                initiator_id,
                candidate,
            } => match self.sessions.get_mut(&initiator_id) {
                Some(session) => {
                    let transport = Arc::clone(&session.transport);
                    session.attach(tokio::spawn(async move {
                        if let Err(err) = transport.add_candidate(candidate).await {
                            tracing::warn!(error = %err, "failed to add initiator candidate");
                        }
                    }));
                }
                None => {
                    tracing::warn!(id = %ShortId(&initiator_id), "dropping candidate for unknown initiator");
                }
            },
            other => {
                tracing::warn!(event = other.event(), "unexpected relay message for a receiver");
            }
        }
    }

    fn on_offer(&mut self, id: String, offer: Value) {
        if let Some(previous) = self.sessions.remove(&id) {
            tracing::warn!(id = %ShortId(&id), "initiator sent a new offer, replacing session");
            self.finish(previous, "superseded by a new offer");
        }

        let (transport, events) = match self.factory.create() {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(id = %ShortId(&id), error = %err, "cannot create transport");
                self.emit(ReceiverEvent::JoinFailed {
                    id,
                    reason: err.to_string(),
                });
                return;
            }
        };

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let mut session = InitiatorSession::new(id.clone(), epoch, offer, Arc::clone(&transport));
        session.attach(tokio::spawn(pump(
            events,
            id.clone(),
            epoch,
            self.signals_tx.clone(),
        )));
        session.attach(tokio::spawn(answer(
            transport,
            session.offer.clone(),
            id.clone(),
            epoch,
            self.relay.clone(),
            self.signals_tx.clone(),
        )));

        tracing::info!(id = %ShortId(&id), "offer received");
        self.sessions.insert(id, session);
    }

    fn on_signal(&mut self, signal: SessionSignal) {
        let SessionSignal { id, epoch, kind } = signal;
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.epoch != epoch {
            return;
        }

        match kind {
            SignalKind::AnswerFailed(reason) => self.evict(&id, &reason),
            SignalKind::Transport(TransportEvent::LocalCandidate(Some(candidate))) => {
                let sent = self.relay.send(ToRelay::ReceiverCandidate {
                    initiator_id: id.clone(),
                    candidate,
                });
                if sent.is_err() {
                    tracing::debug!(id = %ShortId(&id), "relay gone, candidate not sent");
                }
            }
            SignalKind::Transport(TransportEvent::LocalCandidate(None)) => {
                tracing::debug!(id = %ShortId(&id), "candidate gathering complete");
            }
            SignalKind::Transport(TransportEvent::ChannelOpen(label)) => {
                if !self.config.channels.contains(&label) {
                    tracing::warn!(id = %ShortId(&id), channel = %label, "initiator opened an unexpected channel");
                }
                tracing::debug!(id = %ShortId(&id), channel = %label, "channel open");
                if session.channel_opened(&label, &self.config.channels) {
                    let joined = JoinedInitiator {
                        id: id.clone(),
                        transport: Arc::clone(&session.transport),
                        channels: self.config.channels.clone(),
                        handlers: session.handlers.clone(),
                        commands: self.commands_tx.clone(),
                    };
                    tracing::info!(id = %ShortId(&id), "initiator joined");
                    self.emit(ReceiverEvent::InitiatorJoined(joined));
                }
            }
            SignalKind::Transport(TransportEvent::ChannelMessage { label, data }) => {
                match control::classify(&data) {
                    Inbound::Heartbeat => {
                        tracing::trace!(id = %ShortId(&id), "heartbeat reply");
                        session.acknowledge();
                    }
                    Inbound::Data(_) if is_internal(&label) => {
                        tracing::debug!(id = %ShortId(&id), "ignoring non-heartbeat message on internal channel");
                    }
                    Inbound::Data(envelope) => session.handlers.dispatch(&label, envelope),
                    Inbound::Malformed(err) => {
                        tracing::warn!(id = %ShortId(&id), channel = %label, error = %err, "dropping malformed peer message");
                    }
                }
            }
            SignalKind::Transport(TransportEvent::ChannelClosed(label)) => {
                session.channel_closed(&label);
                self.evict(&id, &format!("channel '{label}' closed"));
            }
            SignalKind::Transport(TransportEvent::Error(reason)) => self.evict(&id, &reason),
        }
    }

    fn sweep(&mut self) {
        let probe = control::heartbeat_probe();
        let text = match probe.to_text() {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(error = %err, "cannot encode heartbeat probe");
                return;
            }
        };

        let mut expired = Vec::new();
        for (id, session) in &mut self.sessions {
            match session.sweep() {
                Sweep::Skip => {}
                Sweep::Probe => {
                    if let Err(err) = session.transport.send(INTERNAL, &text) {
                        tracing::debug!(id = %ShortId(id), error = %err, "heartbeat probe not sent");
                    }
                }
                Sweep::Expired => expired.push(id.clone()),
            }
        }

        for id in expired {
            tracing::info!(id = %ShortId(&id), "heartbeat timeout");
            self.evict(&id, "heartbeat timeout");
        }
    }

    fn evict(&mut self, id: &str, reason: &str) {
        if let Some(session) = self.sessions.remove(id) {
            self.finish(session, reason);
        }
    }

    /// Close a session removed from the table and report how it ended.
    fn finish(&self, mut session: InitiatorSession, reason: &str) {
        let joined = session.is_joined();
        let state = session.state();
        session.close();
        if joined {
            tracing::info!(id = %ShortId(&session.id), reason = %reason, "initiator left");
            self.emit(ReceiverEvent::InitiatorLeft(session.id.clone()));
        } else {
            tracing::warn!(
                id = %ShortId(&session.id),
                state = ?state,
                reason = %reason,
                "initiator failed to join"
            );
            self.emit(ReceiverEvent::JoinFailed {
                id: session.id.clone(),
                reason: reason.to_string(),
            });
        }
    }
}

/// Forward one session's transport events to the actor.
async fn pump(
    mut events: TransportEvents,
    id: String,
    epoch: u64,
    signals: mpsc::UnboundedSender<SessionSignal>,
) {
    while let Some(event) = events.recv().await {
        let signal = SessionSignal {
            id: id.clone(),
            epoch,
            kind: SignalKind::Transport(event),
        };
        if signals.send(signal).is_err() {
            break;
        }
    }
}

/// Produce the answer for one offer and send it through the relay.
async fn answer(
    transport: Arc<dyn PeerTransport>,
    offer: Value,
    id: String,
    epoch: u64,
    relay: RelaySender,
    signals: mpsc::UnboundedSender<SessionSignal>,
) {
    let failure = match transport.accept_offer(offer).await {
        Ok(answer) => match relay.send(ToRelay::Answer {
            initiator_id: id.clone(),
            answer,
        }) {
            Ok(()) => {
                tracing::debug!(id = %ShortId(&id), "answer sent");
                return;
            }
            Err(err) => err.to_string(),
        },
        Err(err) => err.to_string(),
    };
    let _ = signals.send(SessionSignal {
        id,
        epoch,
        kind: SignalKind::AnswerFailed(failure),
    });
}
