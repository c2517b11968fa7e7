//! Connection registry and message routing.
//!
//! The registry is plain synchronous state. The server keeps it behind a
//! mutex and runs every connect, message and disconnect callback to
//! completion under that lock, so routing decisions never interleave.

use std::collections::HashMap;

use sigrelay_wire::code::normalize;
use sigrelay_wire::{Envelope, FromRelay, MessageError, ShortId, ToRelay};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue of one connection, drained by its writer task.
pub type Outbox = mpsc::UnboundedSender<Envelope>;

/// What a connection is known as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Connected but not registered. Initiators stay here.
    Unassigned,
    /// Registered under `code` (uppercase).
    Receiver { code: String },
}

#[derive(Debug)]
struct Connection {
    outbox: Outbox,
    role: Role,
}

/// Routing state of one relay instance.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<String, Connection>,
    /// Code to the id of the receiver currently reachable under it.
    receivers: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection under a fresh UUID and announce the id to it.
    pub fn connect(&mut self, outbox: Outbox) -> String {
        let id = Uuid::new_v4().to_string();
        self.connect_with_id(id.clone(), outbox);
        id
    }

    /// Register a connection under an explicit id.
    pub fn connect_with_id(&mut self, id: String, outbox: Outbox) {
        let _ = outbox.send(FromRelay::ClientId { id: id.clone() }.into());
        tracing::debug!(id = %ShortId(&id), "connection registered");
        self.connections.insert(
            id,
            Connection {
                outbox,
                role: Role::Unassigned,
            },
        );
    }

    /// Forget a connection.
    ///
    /// Returns the code it held if it was the receiver currently reachable
    /// under that code; a receiver that was superseded releases nothing.
    pub fn disconnect(&mut self, id: &str) -> Option<String> {
        let connection = self.connections.remove(id)?;
        let Role::Receiver { code } = connection.role else {
            return None;
        };
        if self.receivers.get(&code).map(String::as_str) != Some(id) {
            tracing::debug!(id = %ShortId(id), code = %code, "superseded receiver left");
            return None;
        }
        self.receivers.remove(&code);
        tracing::info!(id = %ShortId(id), code = %code, "receiver left, code released");
        Some(code)
    }

    /// Mark a connection as the receiver for `code`.
    ///
    /// The code is matched case-insensitively. A later registration under the
    /// same code replaces the earlier one in the lookup table. A connection
    /// upgrades once; repeated requests are ignored.
    pub fn upgrade(&mut self, id: &str, code: &str) -> bool {
        let code = normalize(code);
        if code.is_empty() {
            tracing::warn!(id = %ShortId(id), "ignoring upgrade with empty code");
            return false;
        }
        let Some(connection) = self.connections.get_mut(id) else {
            tracing::warn!(id = %ShortId(id), "upgrade from unknown connection");
            return false;
        };
        if let Role::Receiver { code: existing } = &connection.role {
            tracing::warn!(
                id = %ShortId(id),
                code = %existing,
                requested = %code,
                "connection is already a receiver, ignoring upgrade"
            );
            return false;
        }
        connection.role = Role::Receiver { code: code.clone() };

        if let Some(previous) = self.receivers.insert(code.clone(), id.to_string()) {
            tracing::warn!(
                id = %ShortId(id),
                previous = %ShortId(&previous),
                code = %code,
                "code re-registered, earlier receiver no longer reachable"
            );
        } else {
            tracing::info!(id = %ShortId(id), code = %code, "receiver registered");
        }
        true
    }

    /// Id of the receiver reachable under `code`, any case.
    pub fn find_receiver(&self, code: &str) -> Option<&str> {
        self.receivers.get(&normalize(code)).map(String::as_str)
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.connections.get(id).map(|connection| &connection.role)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of codes currently reachable.
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    /// Route one envelope received from connection `from`.
    ///
    /// Nothing here is fatal to the sender: unroutable messages are dropped
    /// (an offer additionally earns a `NOT_FOUND`), unknown events and bad
    /// payloads are logged and ignored.
    pub fn handle(&mut self, from: &str, envelope: &Envelope) {
        let message = match ToRelay::try_from(envelope) {
            Ok(message) => message,
            Err(MessageError::UnknownEvent(event)) => {
                tracing::warn!(id = %ShortId(from), event = %event, "ignoring unknown event");
                return;
            }
            Err(err) => {
                tracing::warn!(id = %ShortId(from), error = %err, "ignoring malformed message");
                return;
            }
        };

        match message {
            ToRelay::ReceiverUpgrade { code } => {
                self.upgrade(from, &code);
            }
            ToRelay::Offer { receiver_id, offer } => match self.find_receiver(&receiver_id) {
                Some(target) => {
                    let target = target.to_string();
                    tracing::info!(
                        from = %ShortId(from),
                        to = %ShortId(&target),
                        code = %receiver_id,
                        "forwarding offer"
                    );
                    self.deliver(
                        &target,
                        FromRelay::Offer {
                            initiator_id: from.to_string(),
                            offer,
                        },
                    );
                }
                None => {
                    tracing::info!(from = %ShortId(from), code = %receiver_id, "offer for unknown receiver");
                    self.deliver(from, FromRelay::NotFound { receiver_id });
                }
            },
            ToRelay::Answer {
                initiator_id,
                answer,
            } => {
                if self.deliver(&initiator_id, FromRelay::Answer { answer }) {
                    tracing::info!(
                        from = %ShortId(from),
                        to = %ShortId(&initiator_id),
                        "forwarded answer"
                    );
                } else {
                    tracing::warn!(
                        from = %ShortId(from),
                        to = %ShortId(&initiator_id),
                        "dropping answer for unknown initiator"
                    );
                }
            }
            ToRelay::InitiatorCandidate {
                receiver_id,
                candidate,
            } => {
                let target = self.find_receiver(&receiver_id).map(str::to_string);
                let delivered = target.is_some_and(|target| {
                    self.deliver(
                        &target,
                        FromRelay::InitiatorCandidate {
                            initiator_id: from.to_string(),
                            candidate,
                        },
                    )
                });
                if delivered {
                    tracing::debug!(from = %ShortId(from), code = %receiver_id, "forwarded initiator candidate");
                } else {
                    tracing::warn!(from = %ShortId(from), code = %receiver_id, "dropping candidate for unknown receiver");
                }
            }
            ToRelay::ReceiverCandidate {
                initiator_id,
                candidate,
            } => {
                if self.deliver(&initiator_id, FromRelay::ReceiverCandidate { candidate }) {
                    tracing::debug!(from = %ShortId(from), to = %ShortId(&initiator_id), "forwarded receiver candidate");
                } else {
                    tracing::warn!(
                        from = %ShortId(from),
                        to = %ShortId(&initiator_id),
                        "dropping candidate for unknown initiator"
                    );
                }
            }
        }
    }

    fn deliver(&self, id: &str, message: FromRelay) -> bool {
        match self.connections.get(id) {
            Some(connection) => connection.outbox.send(message.into()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sigrelay_wire::event;

    use super::*;

    type Inbox = mpsc::UnboundedReceiver<Envelope>;

    fn join(registry: &mut Registry, id: &str) -> Inbox {
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        registry.connect_with_id(id.to_string(), outbox);
        let hello = inbox.try_recv().expect("client id should be announced");
        assert_eq!(hello, Envelope::new(event::CLIENT_ID, json!(id)));
        inbox
    }

    fn drain(inbox: &mut Inbox) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = inbox.try_recv() {
            out.push(envelope);
        }
        out
    }

    fn offer(code: &str) -> Envelope {
        ToRelay::Offer {
            receiver_id: code.to_string(),
            offer: json!({"type": "offer", "sdp": "v=0"}),
        }
        .into()
    }

    #[test]
    fn connect_assigns_uuid_and_announces_it() {
        let mut registry = Registry::new();
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        let id = registry.connect(outbox);

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(
            inbox.try_recv().expect("client id should be sent"),
            Envelope::from(FromRelay::ClientId { id: id.clone() })
        );
        assert_eq!(registry.role(&id), Some(&Role::Unassigned));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = Registry::new();
        let _inbox = join(&mut registry, "r1");
        assert!(registry.upgrade("r1", "abCd"));

        for variant in ["ABCD", "abcd", "AbCd", " abcd "] {
            assert_eq!(registry.find_receiver(variant), Some("r1"), "{variant}");
        }
        assert_eq!(
            registry.role("r1"),
            Some(&Role::Receiver {
                code: "ABCD".to_string()
            })
        );
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = Registry::new();
        let _r1 = join(&mut registry, "r1");
        let _r2 = join(&mut registry, "r2");

        registry.upgrade("r1", "CODE");
        registry.upgrade("r2", "code");

        assert_eq!(registry.find_receiver("CODE"), Some("r2"));
        assert_eq!(registry.receiver_count(), 1);
    }

    #[test]
    fn superseded_receiver_does_not_release_code() {
        let mut registry = Registry::new();
        let _r1 = join(&mut registry, "r1");
        let _r2 = join(&mut registry, "r2");
        registry.upgrade("r1", "CODE");
        registry.upgrade("r2", "CODE");

        assert_eq!(registry.disconnect("r1"), None);
        assert_eq!(registry.find_receiver("CODE"), Some("r2"));
        assert_eq!(registry.disconnect("r2"), Some("CODE".to_string()));
        assert_eq!(registry.find_receiver("CODE"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn repeated_upgrade_is_ignored() {
        let mut registry = Registry::new();
        let _inbox = join(&mut registry, "r1");

        assert!(registry.upgrade("r1", "AAAA"));
        assert!(!registry.upgrade("r1", "BBBB"));
        assert_eq!(registry.find_receiver("AAAA"), Some("r1"));
        assert_eq!(registry.find_receiver("BBBB"), None);
    }

    #[test]
    fn upgrade_rejects_unknown_connection_and_empty_code() {
        let mut registry = Registry::new();
        let _inbox = join(&mut registry, "r1");

        assert!(!registry.upgrade("ghost", "AAAA"));
        assert!(!registry.upgrade("r1", "   "));
        assert_eq!(registry.role("r1"), Some(&Role::Unassigned));
    }

    #[test]
    fn offer_to_unknown_code_returns_not_found_to_sender_only() {
        let mut registry = Registry::new();
        let mut receiver = join(&mut registry, "r1");
        let mut initiator = join(&mut registry, "i1");
        registry.upgrade("r1", "REAL");

        registry.handle("i1", &offer("nope"));

        assert_eq!(
            drain(&mut initiator),
            vec![Envelope::new(event::NOT_FOUND, json!({"receiverId": "nope"}))]
        );
        assert!(drain(&mut receiver).is_empty());
    }

    #[test]
    fn offer_is_forwarded_with_initiator_id() {
        let mut registry = Registry::new();
        let mut receiver = join(&mut registry, "r1");
        let mut initiator = join(&mut registry, "i1");
        registry.handle("r1", &ToRelay::ReceiverUpgrade { code: "wxyz".into() }.into());

        registry.handle("i1", &offer("WxYz"));

        let forwarded = drain(&mut receiver);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(
            FromRelay::try_from(&forwarded[0]).expect("forwarded offer should parse"),
            FromRelay::Offer {
                initiator_id: "i1".to_string(),
                offer: json!({"type": "offer", "sdp": "v=0"}),
            }
        );
        assert!(drain(&mut initiator).is_empty());
    }

    #[test]
    fn answers_and_candidates_are_routed_both_ways() {
        let mut registry = Registry::new();
        let mut receiver = join(&mut registry, "r1");
        let mut initiator = join(&mut registry, "i1");
        registry.upgrade("r1", "ABCD");

        registry.handle(
            "r1",
            &ToRelay::Answer {
                initiator_id: "i1".into(),
                answer: json!({"type": "answer"}),
            }
            .into(),
        );
        registry.handle(
            "r1",
            &ToRelay::ReceiverCandidate {
                initiator_id: "i1".into(),
                candidate: json!("rc"),
            }
            .into(),
        );
        registry.handle(
            "i1",
            &ToRelay::InitiatorCandidate {
                receiver_id: "abcd".into(),
                candidate: json!("ic"),
            }
            .into(),
        );

        assert_eq!(
            drain(&mut initiator),
            vec![
                Envelope::new(event::ANSWER, json!({"answer": {"type": "answer"}})),
                Envelope::new(event::RECEIVER_CANDIDATE, json!({"candidate": "rc"})),
            ]
        );
        assert_eq!(
            drain(&mut receiver),
            vec![Envelope::new(
                event::INITIATOR_CANDIDATE,
                json!({"candidate": "ic", "initiatorId": "i1"})
            )]
        );
    }

    #[test]
    fn unroutable_messages_are_dropped_quietly() {
        let mut registry = Registry::new();
        let mut sender = join(&mut registry, "r1");

        registry.handle(
            "r1",
            &ToRelay::Answer {
                initiator_id: "gone".into(),
                answer: json!({}),
            }
            .into(),
        );
        registry.handle(
            "r1",
            &ToRelay::ReceiverCandidate {
                initiator_id: "gone".into(),
                candidate: json!({}),
            }
            .into(),
        );
        registry.handle(
            "r1",
            &ToRelay::InitiatorCandidate {
                receiver_id: "NONE".into(),
                candidate: json!({}),
            }
            .into(),
        );

        assert!(drain(&mut sender).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_and_malformed_events_are_ignored() {
        let mut registry = Registry::new();
        let mut sender = join(&mut registry, "i1");

        registry.handle("i1", &Envelope::event("SOMETHING_ELSE"));
        registry.handle("i1", &Envelope::new(event::OFFER, json!("not an object")));
        registry.handle("i1", &Envelope::new(event::RECEIVER_UPGRADE, json!(7)));

        assert!(drain(&mut sender).is_empty());
        assert_eq!(registry.role("i1"), Some(&Role::Unassigned));
    }

    #[test]
    fn disconnect_of_unknown_or_unassigned_releases_nothing() {
        let mut registry = Registry::new();
        let _inbox = join(&mut registry, "i1");

        assert_eq!(registry.disconnect("ghost"), None);
        assert_eq!(registry.disconnect("i1"), None);
        assert!(registry.is_empty());
    }
}
