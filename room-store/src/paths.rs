//! Store layout.
//!
//! ```text
//! rooms/{roomId}/meta
//! rooms/{roomId}/participants/{playerId}
//! rooms/{roomId}/actions/{gameId}:{actionId}
//! rooms/{roomId}/gameState
//! directory/{roomId}
//! ```

use crate::error::{StoreError, StoreResult};
use room_types::{is_valid_key, ActionId, ClientId, GameId, RoomId};

pub(crate) const DIRECTORY: &str = "directory";

pub(crate) fn room(room_id: &RoomId) -> String {
    format!("rooms/{room_id}")
}

pub(crate) fn meta(room_id: &RoomId) -> String {
    format!("rooms/{room_id}/meta")
}

pub(crate) fn participants(room_id: &RoomId) -> String {
    format!("rooms/{room_id}/participants")
}

pub(crate) fn participant(room_id: &RoomId, player_id: &ClientId) -> String {
    format!("rooms/{room_id}/participants/{player_id}")
}

pub(crate) fn actions(room_id: &RoomId) -> String {
    format!("rooms/{room_id}/actions")
}

/// Action records are keyed by epoch and action id, so the same action id
/// can be appended once per epoch.
pub(crate) fn action(room_id: &RoomId, game_id: &GameId, action_id: &ActionId) -> String {
    format!("rooms/{room_id}/actions/{game_id}:{action_id}")
}

pub(crate) fn game_state(room_id: &RoomId) -> String {
    format!("rooms/{room_id}/gameState")
}

pub(crate) fn directory_entry(room_id: &RoomId) -> String {
    format!("{DIRECTORY}/{room_id}")
}

/// Reject ids that would break the path layout.
pub(crate) fn check_key(key: &str) -> StoreResult<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_path_is_epoch_scoped() {
        let path = action(&RoomId::new("r1"), &GameId::new("g1"), &ActionId::new("a1"));
        assert_eq!(path, "rooms/r1/actions/g1:a1");
    }

    #[test]
    fn keys_with_separators_are_rejected() {
        assert!(check_key("room-1").is_ok());
        assert!(matches!(
            check_key("a/b"),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(check_key("").is_err());
    }
}
