//! Room records held in the replicated store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ActionRecord, ClientId, GameId, PingToken, RoomId};

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    /// Waiting for players to fill the room.
    Waiting,
    /// Every seat is taken.
    Playing,
}

/// Room metadata. `current_game_id` is the epoch token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMeta {
    /// Room identifier.
    pub room_id: RoomId,
    /// Current host.
    pub host_id: ClientId,
    /// Number of players the room is full at (at least 2).
    pub expected_players: u32,
    /// Epoch token; changes only on restart or round reset.
    pub current_game_id: GameId,
    /// Creation time (unix millis).
    pub created_at: i64,
    /// Last metadata change (unix millis).
    pub updated_at: i64,
    /// Time after which the room may be swept (unix millis).
    pub expires_at: i64,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Dealer seat the current epoch's fresh state was dealt with.
    #[serde(default)]
    pub dealer_seat: usize,
}

impl RoomMeta {
    /// Whether `participant_count` players fill this room.
    pub fn is_full(&self, participant_count: usize) -> bool {
        participant_count >= self.expected_players as usize
    }
}

/// A participant's role in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Room creator (or the participant the room was handed off to).
    Host,
    /// Anyone who joined an existing room.
    Guest,
}

/// Participant presence record.
///
/// Liveness is a mutual round trip: a client publishes `ping_token`, the
/// peer echoes it in `ack_for_peer_ping_token`. A fresh `last_seen_at` alone
/// only proves the peer can write to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// Player id.
    pub player_id: ClientId,
    /// Display name.
    pub name: String,
    /// Role in the room.
    pub role: Role,
    /// First join time; preserved across re-joins and heartbeats.
    pub joined_at: i64,
    /// Last heartbeat time.
    pub last_seen_at: i64,
    /// Token this player currently asks peers to echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_token: Option<PingToken>,
    /// When `ping_token` was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_at: Option<i64>,
    /// Latest peer token this player has echoed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_for_peer_ping_token: Option<PingToken>,
    /// When the echo was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_at: Option<i64>,
}

impl Presence {
    /// Create a presence record for a player joining at `now`.
    pub fn joined(player_id: ClientId, name: impl Into<String>, role: Role, now: i64) -> Self {
        Self {
            player_id,
            name: name.into(),
            role,
            joined_at: now,
            last_seen_at: now,
            ping_token: None,
            ping_at: None,
            ack_for_peer_ping_token: None,
            ack_at: None,
        }
    }
}

/// Merge patch for a presence record (heartbeat, ping and ack fields).
///
/// Only fields that are `Some` are written; `joined_at` is never touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresencePatch {
    /// New display name.
    pub name: Option<String>,
    /// Heartbeat time.
    pub last_seen_at: Option<i64>,
    /// Newly issued ping token.
    pub ping_token: Option<PingToken>,
    /// Issue time of `ping_token`.
    pub ping_at: Option<i64>,
    /// Peer token being echoed.
    pub ack_for_peer_ping_token: Option<PingToken>,
    /// Echo time.
    pub ack_at: Option<i64>,
}

impl PresencePatch {
    /// A plain heartbeat at `now`.
    pub fn heartbeat(now: i64) -> Self {
        Self {
            last_seen_at: Some(now),
            ..Self::default()
        }
    }

    /// Whether the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.to_fields().is_empty()
    }

    /// Render the patch as store fields (camelCase keys).
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(name) = &self.name {
            fields.insert("name".into(), Value::from(name.as_str()));
        }
        if let Some(at) = self.last_seen_at {
            fields.insert("lastSeenAt".into(), Value::from(at));
        }
        if let Some(token) = &self.ping_token {
            fields.insert("pingToken".into(), Value::from(token.as_str()));
        }
        if let Some(at) = self.ping_at {
            fields.insert("pingAt".into(), Value::from(at));
        }
        if let Some(token) = &self.ack_for_peer_ping_token {
            fields.insert("ackForPeerPingToken".into(), Value::from(token.as_str()));
        }
        if let Some(at) = self.ack_at {
            fields.insert("ackAt".into(), Value::from(at));
        }
        fields
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, presence: &mut Presence) {
        if let Some(name) = &self.name {
            presence.name = name.clone();
        }
        if let Some(at) = self.last_seen_at {
            presence.last_seen_at = at;
        }
        if let Some(token) = &self.ping_token {
            presence.ping_token = Some(token.clone());
        }
        if let Some(at) = self.ping_at {
            presence.ping_at = Some(at);
        }
        if let Some(token) = &self.ack_for_peer_ping_token {
            presence.ack_for_peer_ping_token = Some(token.clone());
        }
        if let Some(at) = self.ack_at {
            presence.ack_at = Some(at);
        }
    }
}

/// Read view of a room.
///
/// `actions` holds only records of the current epoch, deduplicated by id and
/// ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Room metadata.
    pub meta: RoomMeta,
    /// Participants in canonical order.
    pub participants: Vec<Presence>,
    /// Current-epoch action log.
    pub actions: Vec<ActionRecord>,
    /// Cached full game state, when requested and present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<Value>,
    /// Whether `game_state` was requested.
    pub game_state_included: bool,
}

impl RoomSnapshot {
    /// The room's current epoch token.
    pub fn game_id(&self) -> &GameId {
        &self.meta.current_game_id
    }

    /// Look up a participant.
    pub fn participant(&self, player_id: &ClientId) -> Option<&Presence> {
        self.participants.iter().find(|p| &p.player_id == player_id)
    }

    /// Whether every seat is taken.
    pub fn is_full(&self) -> bool {
        self.meta.is_full(self.participants.len())
    }
}

/// Discovery record for a joinable room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Room identifier.
    pub room_id: RoomId,
    /// Current host.
    pub host_id: ClientId,
    /// Host display name.
    pub host_name: String,
    /// Capacity.
    pub expected_players: u32,
    /// Participants at last refresh.
    pub participant_count: u32,
    /// Room status at last refresh.
    pub status: RoomStatus,
    /// Whether the room should be listed at all.
    pub discoverable: bool,
    /// Creation time (unix millis).
    pub created_at: i64,
    /// Last refresh (unix millis).
    pub updated_at: i64,
    /// Entry is ignored and swept at or after this time (unix millis).
    pub expires_at: i64,
}

impl DirectoryEntry {
    /// Whether the entry's TTL has elapsed at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence() -> Presence {
        Presence::joined(ClientId::new("p1"), "Ada", Role::Host, 100)
    }

    #[test]
    fn presence_omits_unset_ping_fields() {
        let json = serde_json::to_value(presence()).unwrap();
        assert_eq!(json["joinedAt"], 100);
        assert!(json.get("pingToken").is_none());
        assert!(json.get("ackAt").is_none());
    }

    #[test]
    fn patch_never_writes_joined_at() {
        let patch = PresencePatch {
            last_seen_at: Some(500),
            ping_token: Some(PingToken::new("t1")),
            ping_at: Some(500),
            ..PresencePatch::default()
        };
        let fields = patch.to_fields();
        assert_eq!(fields.len(), 3);
        assert!(!fields.contains_key("joinedAt"));
    }

    #[test]
    fn patch_applies_in_memory() {
        let mut p = presence();
        PresencePatch {
            last_seen_at: Some(900),
            ack_for_peer_ping_token: Some(PingToken::new("peer")),
            ack_at: Some(901),
            ..PresencePatch::default()
        }
        .apply_to(&mut p);
        assert_eq!(p.joined_at, 100);
        assert_eq!(p.last_seen_at, 900);
        assert_eq!(p.ack_for_peer_ping_token, Some(PingToken::new("peer")));
        assert_eq!(p.ack_at, Some(901));
    }

    #[test]
    fn empty_patch_is_empty() {
        assert!(PresencePatch::default().is_empty());
        assert!(!PresencePatch::heartbeat(1).is_empty());
    }

    #[test]
    fn meta_without_dealer_seat_defaults_to_zero() {
        let json = serde_json::json!({
            "roomId": "r", "hostId": "h", "expectedPlayers": 2,
            "currentGameId": "g", "createdAt": 1, "updatedAt": 1,
            "expiresAt": 10, "status": "waiting"
        });
        let meta: RoomMeta = serde_json::from_value(json).unwrap();
        assert_eq!(meta.dealer_seat, 0);
        assert!(!meta.is_full(1));
        assert!(meta.is_full(2));
    }

    #[test]
    fn directory_entry_expiry_is_inclusive() {
        let entry = DirectoryEntry {
            room_id: RoomId::new("r"),
            host_id: ClientId::new("h"),
            host_name: "H".into(),
            expected_players: 2,
            participant_count: 1,
            status: RoomStatus::Waiting,
            discoverable: true,
            created_at: 0,
            updated_at: 0,
            expires_at: 50,
        };
        assert!(!entry.is_expired(49));
        assert!(entry.is_expired(50));
    }
}
