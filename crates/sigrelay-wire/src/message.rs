//! Typed views of the relay protocol.
//!
//! The same event name carries a different payload depending on which side of
//! the relay it travels: an `OFFER` sent to the relay names the receiver code,
//! the `OFFER` the relay forwards names the initiator instead. [`ToRelay`]
//! covers client-to-relay messages, [`FromRelay`] relay-to-client ones.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::envelope::{event, Envelope};
use crate::error::MessageError;

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ToRelay {
    ReceiverUpgrade { code: String },
    Offer { receiver_id: String, offer: Value },
    Answer { initiator_id: String, answer: Value },
    InitiatorCandidate { receiver_id: String, candidate: Value },
    ReceiverCandidate { initiator_id: String, candidate: Value },
}

/// Messages the relay delivers to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum FromRelay {
    ClientId { id: String },
    Offer { initiator_id: String, offer: Value },
    Answer { answer: Value },
    InitiatorCandidate { initiator_id: String, candidate: Value },
    ReceiverCandidate { candidate: Value },
    NotFound { receiver_id: String },
}

impl ToRelay {
    /// Protocol event name.
    pub fn event(&self) -> &'static str {
        match self {
            Self::ReceiverUpgrade { .. } => event::RECEIVER_UPGRADE,
            Self::Offer { .. } => event::OFFER,
            Self::Answer { .. } => event::ANSWER,
            Self::InitiatorCandidate { .. } => event::INITIATOR_CANDIDATE,
            Self::ReceiverCandidate { .. } => event::RECEIVER_CANDIDATE,
        }
    }
}

impl FromRelay {
    /// Protocol event name.
    pub fn event(&self) -> &'static str {
        match self {
            Self::ClientId { .. } => event::CLIENT_ID,
            Self::Offer { .. } => event::OFFER,
            Self::Answer { .. } => event::ANSWER,
            Self::InitiatorCandidate { .. } => event::INITIATOR_CANDIDATE,
            Self::ReceiverCandidate { .. } => event::RECEIVER_CANDIDATE,
            Self::NotFound { .. } => event::NOT_FOUND,
        }
    }
}

impl From<ToRelay> for Envelope {
    fn from(message: ToRelay) -> Self {
        let event = message.event();
        let payload = match message {
            ToRelay::ReceiverUpgrade { code } => Value::String(code),
            ToRelay::Offer { receiver_id, offer } => {
                json!({ "receiverId": receiver_id, "offer": offer })
            }
            ToRelay::Answer {
                initiator_id,
                answer,
            } => json!({ "answer": answer, "initiatorId": initiator_id }),
            ToRelay::InitiatorCandidate {
                receiver_id,
                candidate,
            } => json!({ "candidate": candidate, "receiverId": receiver_id }),
            ToRelay::ReceiverCandidate {
                initiator_id,
                candidate,
            } => json!({ "candidate": candidate, "initiatorId": initiator_id }),
        };
        Envelope::new(event, payload)
    }
}

impl From<FromRelay> for Envelope {
    fn from(message: FromRelay) -> Self {
        let event = message.event();
        let payload = match message {
            FromRelay::ClientId { id } => Value::String(id),
            FromRelay::Offer {
                initiator_id,
                offer,
            } => json!({ "offer": offer, "initiatorId": initiator_id }),
            FromRelay::Answer { answer } => json!({ "answer": answer }),
            FromRelay::InitiatorCandidate {
                initiator_id,
                candidate,
            } => json!({ "candidate": candidate, "initiatorId": initiator_id }),
            FromRelay::ReceiverCandidate { candidate } => json!({ "candidate": candidate }),
            FromRelay::NotFound { receiver_id } => json!({ "receiverId": receiver_id }),
        };
        Envelope::new(event, payload)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiverAddressed {
    receiver_id: String,
    #[serde(default)]
    offer: Value,
    #[serde(default)]
    candidate: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiatorAddressed {
    initiator_id: String,
    #[serde(default)]
    offer: Value,
    #[serde(default)]
    answer: Value,
    #[serde(default)]
    candidate: Value,
}

#[derive(Deserialize)]
struct Unaddressed {
    #[serde(default)]
    answer: Value,
    #[serde(default)]
    candidate: Value,
}

fn payload<T: DeserializeOwned>(
    envelope: &Envelope,
    event: &'static str,
) -> Result<T, MessageError> {
    envelope
        .payload_as()
        .map_err(|source| MessageError::InvalidPayload { event, source })
}

impl TryFrom<&Envelope> for ToRelay {
    type Error = MessageError;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        match envelope.event.as_str() {
            event::RECEIVER_UPGRADE => Ok(Self::ReceiverUpgrade {
                code: payload(envelope, event::RECEIVER_UPGRADE)?,
            }),
            event::OFFER => {
                let p: ReceiverAddressed = payload(envelope, event::OFFER)?;
                Ok(Self::Offer {
                    receiver_id: p.receiver_id,
                    offer: p.offer,
                })
            }
            event::ANSWER => {
                let p: InitiatorAddressed = payload(envelope, event::ANSWER)?;
                Ok(Self::Answer {
                    initiator_id: p.initiator_id,
                    answer: p.answer,
                })
            }
            event::INITIATOR_CANDIDATE => {
                let p: ReceiverAddressed = payload(envelope, event::INITIATOR_CANDIDATE)?;
                Ok(Self::InitiatorCandidate {
                    receiver_id: p.receiver_id,
                    candidate: p.candidate,
                })
            }
            event::RECEIVER_CANDIDATE => {
                let p: InitiatorAddressed = payload(envelope, event::RECEIVER_CANDIDATE)?;
                Ok(Self::ReceiverCandidate {
                    initiator_id: p.initiator_id,
                    candidate: p.candidate,
                })
            }
            other => Err(MessageError::UnknownEvent(other.to_string())),
        }
    }
}

impl TryFrom<&Envelope> for FromRelay {
    type Error = MessageError;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        match envelope.event.as_str() {
            event::CLIENT_ID => Ok(Self::ClientId {
                id: payload(envelope, event::CLIENT_ID)?,
            }),
            event::OFFER => {
                let p: InitiatorAddressed = payload(envelope, event::OFFER)?;
                Ok(Self::Offer {
                    initiator_id: p.initiator_id,
                    offer: p.offer,
                })
            }
            event::ANSWER => {
                let p: Unaddressed = payload(envelope, event::ANSWER)?;
                Ok(Self::Answer { answer: p.answer })
            }
            event::INITIATOR_CANDIDATE => {
                let p: InitiatorAddressed = payload(envelope, event::INITIATOR_CANDIDATE)?;
                Ok(Self::InitiatorCandidate {
                    initiator_id: p.initiator_id,
                    candidate: p.candidate,
                })
            }
            event::RECEIVER_CANDIDATE => {
                let p: Unaddressed = payload(envelope, event::RECEIVER_CANDIDATE)?;
                Ok(Self::ReceiverCandidate {
                    candidate: p.candidate,
                })
            }
            event::NOT_FOUND => {
                let p: ReceiverAddressed = payload(envelope, event::NOT_FOUND)?;
                Ok(Self::NotFound {
                    receiver_id: p.receiver_id,
                })
            }
            other => Err(MessageError::UnknownEvent(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_to_relay_uses_camel_case_fields() {
        let envelope: Envelope = ToRelay::Offer {
            receiver_id: "abcd".to_string(),
            offer: json!({"sdp": "v=0"}),
        }
        .into();

        assert_eq!(envelope.event, "OFFER");
        assert_eq!(envelope.payload["receiverId"], "abcd");
        assert_eq!(envelope.payload["offer"]["sdp"], "v=0");
    }

    #[test]
    fn upgrade_payload_is_the_bare_code() {
        let envelope: Envelope = ToRelay::ReceiverUpgrade {
            code: "WXYZ".to_string(),
        }
        .into();
        assert_eq!(envelope.payload, json!("WXYZ"));
        assert_eq!(
            ToRelay::try_from(&envelope).unwrap(),
            ToRelay::ReceiverUpgrade {
                code: "WXYZ".to_string()
            }
        );
    }

    #[test]
    fn forwarded_offer_names_the_initiator() {
        let envelope = Envelope::new(
            "OFFER",
            json!({"offer": {"type": "offer"}, "initiatorId": "i-1"}),
        );
        let message = FromRelay::try_from(&envelope).unwrap();
        assert_eq!(
            message,
            FromRelay::Offer {
                initiator_id: "i-1".to_string(),
                offer: json!({"type": "offer"}),
            }
        );
    }

    #[test]
    fn not_found_parses_receiver_id() {
        let envelope: Envelope = FromRelay::NotFound {
            receiver_id: "NOPE".to_string(),
        }
        .into();
        assert_eq!(envelope.payload, json!({"receiverId": "NOPE"}));
        assert!(matches!(
            FromRelay::try_from(&envelope),
            Ok(FromRelay::NotFound { receiver_id }) if receiver_id == "NOPE"
        ));
    }

    #[test]
    fn unknown_event_is_reported() {
        let envelope = Envelope::event("game.start");
        assert!(matches!(
            ToRelay::try_from(&envelope),
            Err(MessageError::UnknownEvent(name)) if name == "game.start"
        ));
        assert!(matches!(
            FromRelay::try_from(&envelope),
            Err(MessageError::UnknownEvent(_))
        ));
    }

    #[test]
    fn missing_address_is_an_invalid_payload() {
        let envelope = Envelope::new("ANSWER", json!({"answer": {}}));
        assert!(matches!(
            ToRelay::try_from(&envelope),
            Err(MessageError::InvalidPayload { event: "ANSWER", .. })
        ));
    }

    #[test]
    fn heartbeat_is_not_a_relay_event() {
        let envelope = Envelope::event(event::HEARTBEAT);
        assert!(ToRelay::try_from(&envelope).is_err());
    }
}
