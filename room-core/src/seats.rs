//! Seat assignment and dealer rotation.
//!
//! Every client must seat the same two players in the same order, so the
//! order is a pure function of the participant records: host first, then
//! earliest `joined_at`, then lowest id.

use room_types::{ClientId, Presence, Role};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Player id used for the synthesized opponent of a lone participant.
pub const PLACEHOLDER_ID: &str = "open-seat";

/// A player occupying one seat of the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatPlayer {
    /// Player id.
    pub id: ClientId,
    /// Display name.
    pub name: String,
    /// Whether this seat is waiting for a real player.
    #[serde(default)]
    pub placeholder: bool,
}

impl SeatPlayer {
    /// A real player.
    pub fn player(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            placeholder: false,
        }
    }

    /// The synthesized opponent.
    pub fn placeholder() -> Self {
        Self {
            id: ClientId::new(PLACEHOLDER_ID),
            name: "Open seat".to_string(),
            placeholder: true,
        }
    }
}

impl From<&Presence> for SeatPlayer {
    fn from(p: &Presence) -> Self {
        Self::player(p.player_id.clone(), p.name.clone())
    }
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::Host => 0,
        Role::Guest => 1,
    }
}

fn canonical_cmp(a: &Presence, b: &Presence) -> Ordering {
    role_rank(a.role)
        .cmp(&role_rank(b.role))
        .then(a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

/// Participants sorted host first, then by join time, then by id.
pub fn canonical_order(participants: &[Presence]) -> Vec<&Presence> {
    let mut ordered: Vec<&Presence> = participants.iter().collect();
    ordered.sort_by(|a, b| canonical_cmp(a, b));
    ordered
}

/// The two seated players, padding with a placeholder when alone.
pub fn seat_players(participants: &[Presence]) -> [SeatPlayer; 2] {
    let ordered = canonical_order(participants);
    let first = ordered
        .first()
        .map(|p| SeatPlayer::from(*p))
        .unwrap_or_else(SeatPlayer::placeholder);
    let second = ordered
        .get(1)
        .map(|p| SeatPlayer::from(*p))
        .unwrap_or_else(SeatPlayer::placeholder);
    [first, second]
}

/// Dealer seat for the next round.
///
/// The deal passes away from the player who dealt the prior round, wherever
/// that player sits after re-seating. When the prior dealer is gone or was a
/// placeholder, the seat index simply rotates.
pub fn next_dealer_seat(
    prior_seats: &[SeatPlayer; 2],
    prior_dealer: usize,
    new_seats: &[SeatPlayer; 2],
) -> usize {
    let prior = &prior_seats[prior_dealer % 2];
    if !prior.placeholder {
        if let Some(idx) = new_seats
            .iter()
            .position(|s| !s.placeholder && s.id == prior.id)
        {
            return (idx + 1) % 2;
        }
    }
    (prior_dealer + 1) % 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(id: &str, role: Role, joined_at: i64) -> Presence {
        Presence::joined(ClientId::new(id), id.to_uppercase(), role, joined_at)
    }

    #[test]
    fn host_is_seated_first_regardless_of_join_time() {
        let participants = vec![
            presence("guest", Role::Guest, 1),
            presence("host", Role::Host, 5),
        ];
        let seats = seat_players(&participants);
        assert_eq!(seats[0].id, ClientId::new("host"));
        assert_eq!(seats[1].id, ClientId::new("guest"));
    }

    #[test]
    fn join_time_then_id_break_ties() {
        let participants = vec![
            presence("zed", Role::Guest, 10),
            presence("amy", Role::Guest, 10),
            presence("bob", Role::Guest, 3),
        ];
        let order: Vec<&str> = canonical_order(&participants)
            .iter()
            .map(|p| p.player_id.as_str())
            .collect();
        assert_eq!(order, vec!["bob", "amy", "zed"]);
    }

    #[test]
    fn lone_participant_gets_placeholder_opponent() {
        let seats = seat_players(&[presence("host", Role::Host, 1)]);
        assert!(!seats[0].placeholder);
        assert!(seats[1].placeholder);
        assert_eq!(seats[1].id.as_str(), PLACEHOLDER_ID);
    }

    #[test]
    fn dealer_passes_away_from_prior_dealer() {
        let a = SeatPlayer::player(ClientId::new("a"), "A");
        let b = SeatPlayer::player(ClientId::new("b"), "B");
        let prior = [a.clone(), b.clone()];
        assert_eq!(next_dealer_seat(&prior, 0, &prior), 1);
        assert_eq!(next_dealer_seat(&prior, 1, &prior), 0);
        // Re-seated: b now sits first; a dealt before so b (seat 0) deals.
        let swapped = [b, a];
        assert_eq!(next_dealer_seat(&prior, 0, &swapped), 0);
    }

    #[test]
    fn placeholder_dealer_rotates_by_index() {
        let prior = [
            SeatPlayer::player(ClientId::new("a"), "A"),
            SeatPlayer::placeholder(),
        ];
        let now = [
            SeatPlayer::player(ClientId::new("a"), "A"),
            SeatPlayer::player(ClientId::new("c"), "C"),
        ];
        assert_eq!(next_dealer_seat(&prior, 1, &now), 0);
    }
}
