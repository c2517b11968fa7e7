//! Receiver-side record of one initiator.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use sigrelay_transport::PeerTransport;
use tokio::task::JoinHandle;

use crate::channels::{is_internal, ChannelSet};
use crate::handle::HandlerSlot;

/// Lifecycle of an initiator as seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Offer received, answer being produced.
    OfferReceived,
    /// At least one channel open, waiting for the rest.
    ChannelsPending,
    /// Every required channel open; the application has a handle.
    Joined,
    Closed,
}

/// Outcome of one liveness sweep for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sweep {
    /// Not probed: not joined yet, or no open internal channel.
    Skip,
    /// Alive since the last sweep; a new probe is due.
    Probe,
    /// No reply since the previous probe.
    Expired,
}

pub(crate) struct InitiatorSession {
    pub(crate) id: String,
    /// Distinguishes this session from an earlier one under the same id.
    pub(crate) epoch: u64,
    pub(crate) offer: Value,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) handlers: HandlerSlot,
    opened: HashSet<String>,
    state: SessionState,
    alive: bool,
    internal_open: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl InitiatorSession {
    pub(crate) fn new(
        id: String,
        epoch: u64,
        offer: Value,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            id,
            epoch,
            offer,
            transport,
            handlers: HandlerSlot::default(),
            opened: HashSet::new(),
            state: SessionState::OfferReceived,
            alive: false,
            internal_open: false,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.state == SessionState::Joined
    }

    /// Record an open channel. Returns true exactly once: when this open
    /// completes the required set.
    pub(crate) fn channel_opened(&mut self, label: &str, required: &ChannelSet) -> bool {
        if is_internal(label) {
            self.internal_open = true;
        }
        self.opened.insert(label.to_string());
        match self.state {
            SessionState::OfferReceived | SessionState::ChannelsPending => {
                if required.is_complete(&self.opened) {
                    self.state = SessionState::Joined;
                    self.alive = true;
                    true
                } else {
                    self.state = SessionState::ChannelsPending;
                    false
                }
            }
            SessionState::Joined | SessionState::Closed => false,
        }
    }

    pub(crate) fn channel_closed(&mut self, label: &str) {
        if is_internal(label) {
            self.internal_open = false;
        }
        self.opened.remove(label);
    }

    /// A heartbeat arrived from the initiator.
    pub(crate) fn acknowledge(&mut self) {
        self.alive = true;
    }

    pub(crate) fn sweep(&mut self) -> Sweep {
        if self.state != SessionState::Joined || !self.internal_open {
            return Sweep::Skip;
        }
        if self.alive {
            self.alive = false;
            Sweep::Probe
        } else {
            Sweep::Expired
        }
    }

    /// Tie a background task to this session; it is aborted on close.
    pub(crate) fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(task);
    }

    pub(crate) fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.transport.close();
    }
}

impl Drop for InitiatorSession {
    fn drop(&mut self) {
        self.close();
    }
}
