//! Domain actions and their durable, epoch-bound records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ActionId, ClientId, GameId};

/// Payload key naming the player an action is performed by.
const ACTOR_KEY: &str = "playerId";

/// A domain event produced by local input.
///
/// `id` is assigned by the originating client and is the idempotency key for
/// the action log, peer ACKs and the local already-applied check. Everything
/// other than `id` and `type` is an opaque payload interpreted by the game
/// rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Globally unique action id.
    pub id: ActionId,
    /// Action kind, e.g. `"ready"` or `"play"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining payload fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    /// Create an action of the given kind with a fresh id and empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_id(ActionId::generate(), kind)
    }

    /// Create an action with an explicit id.
    pub fn with_id(id: ActionId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field (builder style).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Set the acting player (builder style).
    pub fn by(self, player: &ClientId) -> Self {
        self.with(ACTOR_KEY, player.as_str())
    }

    /// The player this action is performed by, if the payload names one.
    pub fn actor(&self) -> Option<ClientId> {
        self.payload
            .get(ACTOR_KEY)
            .and_then(Value::as_str)
            .map(ClientId::from)
    }

    /// Read a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// An action bound to one session epoch, as persisted in the room store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Same as `action.id`.
    pub id: ActionId,
    /// Epoch the action was appended under.
    pub game_id: GameId,
    /// The action itself.
    pub action: Action,
    /// Player that appended the action.
    pub actor_id: ClientId,
    /// Store clock at append time (unix millis).
    pub created_at: i64,
}
