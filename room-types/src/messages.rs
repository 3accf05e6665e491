//! Peer-to-peer and signaling messages.
//!
//! [`PeerMessage`] travels over mesh channels and, wrapped in
//! [`SignalingMessage::RelayTo`], through the signaling relay. Both paths
//! carry the same frame so the receiver cannot tell them apart.

use serde::{Deserialize, Serialize};

use crate::{Action, ActionId, ClientId, GameId, RoomId, TypesError};

/// Message exchanged between room peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PeerMessage {
    /// A game action; tracked until every peer ACKs it.
    Action {
        /// Originating client.
        from: ClientId,
        /// Epoch the action was applied in. Receivers on another epoch drop it.
        game_id: GameId,
        /// The action.
        action: Action,
    },
    /// Receipt for an action.
    Ack {
        /// Acknowledging client.
        from: ClientId,
        /// Action being acknowledged.
        action_id: ActionId,
    },
    /// Ask the receiver to pull the room from the store and reconcile.
    SyncRequest {
        /// Requesting client.
        from: ClientId,
        /// Epoch the requester was on, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_id: Option<GameId>,
    },
}

impl PeerMessage {
    /// The client that produced this message.
    pub fn sender(&self) -> &ClientId {
        match self {
            Self::Action { from, .. } | Self::Ack { from, .. } | Self::SyncRequest { from, .. } => {
                from
            }
        }
    }

    /// Serialize to MessagePack bytes (field names preserved).
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SdpKind {
    /// Initiator's description.
    Offer,
    /// Responder's description.
    Answer,
}

/// Session description produced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    pub kind: SdpKind,
    /// Opaque transport payload.
    pub sdp: String,
}

impl SessionDescription {
    /// An offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate produced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Opaque candidate line.
    pub candidate: String,
    /// Media stream id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

impl IceCandidate {
    /// A candidate with only a candidate line.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
        }
    }
}

/// Negotiation payload forwarded between two peers by the signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum SignalPayload {
    /// Session offer.
    Offer(SessionDescription),
    /// Session answer.
    Answer(SessionDescription),
    /// Connectivity candidate.
    Candidate(IceCandidate),
}

/// Message sent from a client to the signaling relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SignalingMessage {
    /// Create (and join) a relay room.
    CreateRoom {
        /// Room to create.
        room_id: RoomId,
        /// Creating client.
        client_id: ClientId,
    },
    /// Join a relay room.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
        /// Joining client.
        client_id: ClientId,
    },
    /// Forward a negotiation payload to one peer.
    Signal {
        /// Recipient.
        to: ClientId,
        /// Payload.
        payload: SignalPayload,
    },
    /// Relay a peer message to one peer, or to everyone else when `to` is `None`.
    RelayTo {
        /// Recipient, or broadcast.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        /// Message to relay.
        message: PeerMessage,
    },
}

/// Event delivered from the signaling relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SignalingEvent {
    /// The relay room was created.
    RoomCreated {
        /// Created room.
        room_id: RoomId,
    },
    /// Peers already present when this client joined.
    PeerList {
        /// Other members.
        peers: Vec<ClientId>,
    },
    /// A peer joined after this client.
    PeerJoined {
        /// The new peer.
        peer: ClientId,
    },
    /// A peer left the relay room.
    PeerLeft {
        /// The departed peer.
        peer: ClientId,
    },
    /// Negotiation payload from a peer.
    Signal {
        /// Sender.
        from: ClientId,
        /// Payload.
        payload: SignalPayload,
    },
    /// Relayed peer message.
    Relay {
        /// Sender.
        from: ClientId,
        /// Message.
        message: PeerMessage,
    },
    /// Relay-side error.
    Error {
        /// Description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_message_survives_msgpack() {
        let msg = PeerMessage::Action {
            from: ClientId::new("host"),
            game_id: GameId::new("epoch-1"),
            action: Action::with_id(ActionId::new("a1"), "play")
                .by(&ClientId::new("host"))
                .with("card", 12),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(PeerMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn sync_request_without_game_id_decodes() {
        let msg = PeerMessage::SyncRequest {
            from: ClientId::new("g"),
            game_id: None,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(PeerMessage::from_bytes(&bytes).unwrap(), msg);
        assert_eq!(msg.sender(), &ClientId::new("g"));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            PeerMessage::from_bytes(&[0xc1, 0x00]),
            Err(TypesError::Deserialization(_))
        ));
    }

    #[test]
    fn signaling_json_shape() {
        let msg = SignalingMessage::RelayTo {
            to: None,
            message: PeerMessage::Ack {
                from: ClientId::new("a"),
                action_id: ActionId::new("x"),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "relayTo");
        assert_eq!(json["message"]["type"], "ack");
        assert_eq!(json["message"]["actionId"], "x");
        assert!(json.get("to").is_none());
    }

    #[test]
    fn signal_payload_json_shape() {
        let payload = SignalPayload::Offer(SessionDescription::offer("v=0"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "offer");
        assert_eq!(json["data"]["sdp"], "v=0");
    }
}
