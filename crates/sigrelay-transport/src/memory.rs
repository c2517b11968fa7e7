//! In-process peer transport.
//!
//! A [`MemoryHub`] hands out [`MemoryTransport`]s identified by an endpoint
//! token. The session descriptions they exchange are just
//! `{"type": "offer" | "answer", "endpoint": <token>}`; applying the answer on
//! the initiator side links both transports through the hub and opens the
//! initiator's channels on both sides, in creation order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{
    Candidate, ChannelSpec, ChannelState, PeerTransport, SessionDescription, TransportEvent,
    TransportEvents, TransportFactory,
};

/// Candidates emitted per description before the end-of-gathering marker.
const CANDIDATES_PER_SIDE: usize = 2;

/// Registry linking memory transports in one process.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    endpoints: HashMap<String, Weak<MemoryTransport>>,
    refused: HashSet<String>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint and the queue its events arrive on.
    pub fn transport(&self) -> (Arc<MemoryTransport>, TransportEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        inner.endpoints.retain(|_, endpoint| endpoint.strong_count() > 0);
        let token = format!("mem-{}", inner.next_id);

        let transport = Arc::new_cyclic(|me| MemoryTransport {
            token: token.clone(),
            me: me.clone(),
            hub: self.clone(),
            events,
            state: Mutex::new(EndpointState::default()),
        });
        inner.endpoints.insert(token, Arc::downgrade(&transport));
        (transport, rx)
    }

    /// Make every later link fail to open channels named `label`.
    ///
    /// The initiator side reports a [`TransportEvent::Error`]; the receiver
    /// side never sees the channel.
    pub fn refuse_channel(&self, label: impl Into<String>) {
        self.inner.lock().refused.insert(label.into());
    }

    /// Number of endpoints still alive.
    pub fn live_endpoints(&self) -> usize {
        self.inner
            .lock()
            .endpoints
            .values()
            .filter(|endpoint| endpoint.strong_count() > 0)
            .count()
    }

    fn lookup(&self, token: &str) -> Option<Arc<MemoryTransport>> {
        self.inner
            .lock()
            .endpoints
            .get(token)
            .and_then(Weak::upgrade)
    }

    fn refused(&self) -> HashSet<String> {
        self.inner.lock().refused.clone()
    }
}

impl TransportFactory for MemoryHub {
    fn create(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (transport, events) = self.transport();
        let transport: Arc<dyn PeerTransport> = transport;
        Ok((transport, events))
    }
}

#[derive(Default)]
struct EndpointState {
    channels: Vec<(String, ChannelState)>,
    remote: Option<Weak<MemoryTransport>>,
    remote_candidates: Vec<Candidate>,
    closed: bool,
}

impl EndpointState {
    fn state_of(&self, label: &str) -> Option<ChannelState> {
        self.channels
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, state)| *state)
    }

    /// Mark every channel that is not closed yet as closed; returns the labels
    /// that were open.
    fn close_all(&mut self) -> Vec<String> {
        let mut was_open = Vec::new();
        for (label, state) in &mut self.channels {
            if *state == ChannelState::Open {
                was_open.push(label.clone());
            }
            *state = ChannelState::Closed;
        }
        was_open
    }

    fn remote(&self) -> Option<Arc<MemoryTransport>> {
        self.remote.as_ref().and_then(Weak::upgrade)
    }
}

/// One endpoint created by a [`MemoryHub`].
pub struct MemoryTransport {
    token: String,
    me: Weak<MemoryTransport>,
    hub: MemoryHub,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<EndpointState>,
}

impl MemoryTransport {
    /// Endpoint token carried in this side's session description.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Candidates fed in through [`PeerTransport::add_candidate`].
    pub fn remote_candidates(&self) -> Vec<Candidate> {
        self.state.lock().remote_candidates.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Simulate a platform failure of one channel.
    ///
    /// This side receives [`TransportEvent::Error`], the linked side sees the
    /// channel close.
    pub fn fail_channel(&self, label: &str) {
        let remote = {
            let mut state = self.state.lock();
            if let Some((_, channel)) = state.channels.iter_mut().find(|(name, _)| name == label) {
                *channel = ChannelState::Closed;
            }
            state.remote()
        };
        self.emit(TransportEvent::Error(format!("channel '{label}' failed")));
        if let Some(remote) = remote {
            remote.remote_channel_closed(label);
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn description(&self, kind: &str) -> SessionDescription {
        json!({ "type": kind, "endpoint": self.token })
    }

    fn gather(&self) {
        for index in 0..CANDIDATES_PER_SIDE {
            self.emit(TransportEvent::LocalCandidate(Some(json!({
                "candidate": format!("candidate:{index} memory {}", self.token),
                "sdpMid": "0",
                "sdpMLineIndex": 0,
            }))));
        }
        self.emit(TransportEvent::LocalCandidate(None));
    }

    fn resolve(&self, description: &Value, kind: &str) -> Result<Arc<MemoryTransport>> {
        if description.get("type").and_then(Value::as_str) != Some(kind) {
            return Err(TransportError::InvalidDescription(format!(
                "expected a description of type '{kind}'"
            )));
        }
        let token = description
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::InvalidDescription("missing endpoint".to_string()))?;
        let remote = self
            .hub
            .lookup(token)
            .ok_or_else(|| TransportError::UnknownEndpoint(token.to_string()))?;
        if remote.is_closed() {
            return Err(TransportError::UnknownEndpoint(token.to_string()));
        }
        Ok(remote)
    }

    fn link(&self, remote: &Arc<MemoryTransport>) {
        let refused = self.hub.refused();
        let (opened, failed) = {
            let mut state = self.state.lock();
            state.remote = Some(Arc::downgrade(remote));
            let mut opened = Vec::new();
            let mut failed = Vec::new();
            for (label, channel) in &mut state.channels {
                if *channel != ChannelState::Connecting {
                    continue;
                }
                if refused.contains(label) {
                    *channel = ChannelState::Closed;
                    failed.push(label.clone());
                } else {
                    *channel = ChannelState::Open;
                    opened.push(label.clone());
                }
            }
            (opened, failed)
        };

        {
            let mut remote_state = remote.state.lock();
            remote_state.remote = Some(self.me.clone());
            for label in &opened {
                remote_state
                    .channels
                    .push((label.clone(), ChannelState::Open));
            }
        }

        for label in opened {
            self.emit(TransportEvent::ChannelOpen(label.clone()));
            remote.emit(TransportEvent::ChannelOpen(label));
        }
        for label in failed {
            self.emit(TransportEvent::Error(format!(
                "channel '{label}' failed to open"
            )));
        }
    }

    fn remote_channel_closed(&self, label: &str) {
        let was_open = {
            let mut state = self.state.lock();
            match state.channels.iter_mut().find(|(name, _)| name == label) {
                Some((_, channel)) if *channel == ChannelState::Open => {
                    *channel = ChannelState::Closed;
                    true
                }
                _ => false,
            }
        };
        if was_open {
            self.emit(TransportEvent::ChannelClosed(label.to_string()));
        }
    }

    fn remote_closed(&self) {
        let was_open = {
            let mut state = self.state.lock();
            state.remote = None;
            state.close_all()
        };
        for label in was_open {
            self.emit(TransportEvent::ChannelClosed(label));
        }
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn create_channel(&self, spec: &ChannelSpec) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.state_of(&spec.label).is_some() {
            return Err(TransportError::DuplicateChannel(spec.label.clone()));
        }
        state
            .channels
            .push((spec.label.clone(), ChannelState::Connecting));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.gather();
        Ok(self.description("offer"))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.ensure_open()?;
        let remote = self.resolve(&offer, "offer")?;
        self.state.lock().remote = Some(Arc::downgrade(&remote));
        self.gather();
        Ok(self.description("answer"))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let remote = self.resolve(&answer, "answer")?;
        self.link(&remote);
        Ok(())
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        tracing::debug!(endpoint = %self.token, "remote candidate added");
        state.remote_candidates.push(candidate);
        Ok(())
    }

    fn send(&self, label: &str, data: &str) -> Result<()> {
        let remote = {
            let state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.state_of(label) != Some(ChannelState::Open) {
                return Err(TransportError::ChannelNotOpen(label.to_string()));
            }
            state.remote().ok_or(TransportError::Closed)?
        };
        remote.emit(TransportEvent::ChannelMessage {
            label: label.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn channel_state(&self, label: &str) -> Option<ChannelState> {
        self.state.lock().state_of(label)
    }

    fn close(&self) {
        let (was_open, remote) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let was_open = state.close_all();
            (was_open, state.remote.take().and_then(|remote| remote.upgrade()))
        };
        for label in was_open {
            self.emit(TransportEvent::ChannelClosed(label));
        }
        if let Some(remote) = remote {
            remote.remote_closed();
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(events: &mut TransportEvents) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn opened(events: &[TransportEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::ChannelOpen(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    async fn linked_pair(
        hub: &MemoryHub,
        labels: &[&str],
    ) -> (
        Arc<MemoryTransport>,
        TransportEvents,
        Arc<MemoryTransport>,
        TransportEvents,
    ) {
        let (initiator, initiator_events) = hub.transport();
        let (receiver, receiver_events) = hub.transport();
        for label in labels {
            initiator
                .create_channel(&ChannelSpec::reliable(*label))
                .unwrap();
        }
        let offer = initiator.create_offer().await.unwrap();
        let answer = receiver.accept_offer(offer).await.unwrap();
        initiator.apply_answer(answer).await.unwrap();
        (initiator, initiator_events, receiver, receiver_events)
    }

    #[tokio::test]
    async fn answer_opens_channels_on_both_sides_in_order() {
        let hub = MemoryHub::new();
        let (initiator, mut initiator_events, receiver, mut receiver_events) =
            linked_pair(&hub, &["unreliable", "reliable", "internal"]).await;

        let expected = vec!["unreliable", "reliable", "internal"];
        assert_eq!(opened(&drain(&mut initiator_events)), expected);
        assert_eq!(opened(&drain(&mut receiver_events)), expected);
        assert_eq!(
            receiver.channel_state("internal"),
            Some(ChannelState::Open)
        );
        assert_eq!(
            initiator.channel_state("reliable"),
            Some(ChannelState::Open)
        );
    }

    #[tokio::test]
    async fn descriptions_emit_candidates_then_end_marker() {
        let hub = MemoryHub::new();
        let (initiator, mut events) = hub.transport();
        initiator.create_offer().await.unwrap();

        let events = drain(&mut events);
        assert_eq!(events.len(), CANDIDATES_PER_SIDE + 1);
        assert!(matches!(
            events.last(),
            Some(TransportEvent::LocalCandidate(None))
        ));
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let hub = MemoryHub::new();
        let (initiator, mut initiator_events, receiver, mut receiver_events) =
            linked_pair(&hub, &["reliable"]).await;
        drain(&mut initiator_events);
        drain(&mut receiver_events);

        initiator.send("reliable", "ping").unwrap();
        receiver.send("reliable", "pong").unwrap();

        assert_eq!(
            drain(&mut receiver_events),
            vec![TransportEvent::ChannelMessage {
                label: "reliable".to_string(),
                data: "ping".to_string()
            }]
        );
        assert_eq!(
            drain(&mut initiator_events),
            vec![TransportEvent::ChannelMessage {
                label: "reliable".to_string(),
                data: "pong".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let hub = MemoryHub::new();
        let (initiator, _events) = hub.transport();
        initiator
            .create_channel(&ChannelSpec::reliable("reliable"))
            .unwrap();
        assert!(matches!(
            initiator.send("reliable", "x"),
            Err(TransportError::ChannelNotOpen(_))
        ));
        assert!(matches!(
            initiator.send("missing", "x"),
            Err(TransportError::ChannelNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn close_is_seen_by_the_peer() {
        let hub = MemoryHub::new();
        let (initiator, mut initiator_events, receiver, mut receiver_events) =
            linked_pair(&hub, &["reliable", "internal"]).await;
        drain(&mut initiator_events);
        drain(&mut receiver_events);

        initiator.close();
        initiator.close();

        assert_eq!(drain(&mut initiator_events).len(), 2);
        assert_eq!(
            drain(&mut receiver_events),
            vec![
                TransportEvent::ChannelClosed("reliable".to_string()),
                TransportEvent::ChannelClosed("internal".to_string()),
            ]
        );
        assert!(initiator.is_closed());
        assert!(matches!(
            receiver.send("reliable", "x"),
            Err(TransportError::ChannelNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn dropping_a_transport_closes_the_link() {
        let hub = MemoryHub::new();
        let (initiator, _initiator_events, receiver, mut receiver_events) =
            linked_pair(&hub, &["reliable"]).await;
        drain(&mut receiver_events);

        drop(initiator);

        assert_eq!(
            drain(&mut receiver_events),
            vec![TransportEvent::ChannelClosed("reliable".to_string())]
        );
        assert_eq!(hub.live_endpoints(), 1);
        drop(receiver);
        assert_eq!(hub.live_endpoints(), 0);
    }

    #[tokio::test]
    async fn refused_channel_fails_on_initiator_and_never_opens_remotely() {
        let hub = MemoryHub::new();
        hub.refuse_channel("reliable");
        let (_initiator, mut initiator_events, receiver, mut receiver_events) =
            linked_pair(&hub, &["unreliable", "reliable", "internal"]).await;

        let initiator_events = drain(&mut initiator_events);
        assert_eq!(opened(&initiator_events), vec!["unreliable", "internal"]);
        assert!(initiator_events
            .iter()
            .any(|event| matches!(event, TransportEvent::Error(_))));
        assert_eq!(
            opened(&drain(&mut receiver_events)),
            vec!["unreliable", "internal"]
        );
        assert_eq!(receiver.channel_state("reliable"), None);
    }

    #[tokio::test]
    async fn fail_channel_reports_error_locally_and_close_remotely() {
        let hub = MemoryHub::new();
        let (initiator, mut initiator_events, _receiver, mut receiver_events) =
            linked_pair(&hub, &["reliable", "internal"]).await;
        drain(&mut initiator_events);
        drain(&mut receiver_events);

        initiator.fail_channel("internal");

        assert!(matches!(
            drain(&mut initiator_events).as_slice(),
            [TransportEvent::Error(_)]
        ));
        assert_eq!(
            drain(&mut receiver_events),
            vec![TransportEvent::ChannelClosed("internal".to_string())]
        );
    }

    #[tokio::test]
    async fn candidates_are_recorded() {
        let hub = MemoryHub::new();
        let (transport, _events) = hub.transport();
        transport
            .add_candidate(json!({"candidate": "a"}))
            .await
            .unwrap();
        assert_eq!(transport.remote_candidates(), vec![json!({"candidate": "a"})]);

        transport.close();
        assert!(matches!(
            transport.add_candidate(json!({})).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn bad_descriptions_are_rejected() {
        let hub = MemoryHub::new();
        let (transport, _events) = hub.transport();

        assert!(matches!(
            transport.accept_offer(json!({"type": "answer", "endpoint": "x"})).await,
            Err(TransportError::InvalidDescription(_))
        ));
        assert!(matches!(
            transport.accept_offer(json!({"type": "offer"})).await,
            Err(TransportError::InvalidDescription(_))
        ));
        assert!(matches!(
            transport.apply_answer(json!({"type": "answer", "endpoint": "mem-999"})).await,
            Err(TransportError::UnknownEndpoint(_))
        ));
    }

    #[test]
    fn duplicate_channels_are_rejected() {
        let hub = MemoryHub::new();
        let (transport, _events) = hub.transport();
        transport
            .create_channel(&ChannelSpec::reliable("reliable"))
            .unwrap();
        assert!(matches!(
            transport.create_channel(&ChannelSpec::unreliable("reliable")),
            Err(TransportError::DuplicateChannel(_))
        ));
    }
}
