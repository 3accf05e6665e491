//! Mock game rules for testing.
//!
//! Two seats, each readies up, then they alternate playing cards starting
//! left of the dealer. After [`MockRules::HAND_SIZE`] cards per seat the
//! round moves to scoring.

use room_types::{Action, ActionId, ClientId};
use serde::{Deserialize, Serialize};

use super::{GameRules, RulesError};
use crate::seats::SeatPlayer;

/// Round phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Waiting for both seats to ready up.
    Lobby,
    /// Cards are being played.
    Playing,
    /// Round over.
    Scoring,
}

/// State of the mock game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockState {
    /// The two seats.
    pub seats: [SeatPlayer; 2],
    /// Dealer seat index.
    pub dealer: usize,
    /// Current phase.
    pub phase: Phase,
    /// Players that have readied up.
    pub ready: Vec<ClientId>,
    /// Seat whose turn it is.
    pub turn: usize,
    /// Sum of cards played per seat.
    pub scores: [u64; 2],
    /// Cards played so far.
    pub played: usize,
    /// Applied action ids.
    pub action_log: Vec<ActionId>,
}

/// Mock rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRules;

impl MockRules {
    /// Cards each seat plays per round.
    pub const HAND_SIZE: usize = 2;

    fn seat_of(state: &MockState, player: &ClientId) -> Option<usize> {
        state
            .seats
            .iter()
            .position(|s| !s.placeholder && &s.id == player)
    }
}

impl GameRules for MockRules {
    type State = MockState;

    fn new_game(&self, seats: &[SeatPlayer; 2], dealer_seat: usize) -> MockState {
        let dealer = dealer_seat % 2;
        MockState {
            seats: seats.clone(),
            dealer,
            phase: Phase::Lobby,
            ready: Vec::new(),
            turn: (dealer + 1) % 2,
            scores: [0, 0],
            played: 0,
            action_log: Vec::new(),
        }
    }

    fn apply(&self, state: &MockState, action: &Action) -> Result<MockState, RulesError> {
        if state.action_log.contains(&action.id) {
            return Err(RulesError::illegal(action, "already applied"));
        }
        let actor = action
            .actor()
            .ok_or_else(|| RulesError::illegal(action, "missing playerId"))?;
        let seat = Self::seat_of(state, &actor)
            .ok_or_else(|| RulesError::illegal(action, "actor is not seated"))?;

        let mut next = state.clone();
        match action.kind.as_str() {
            "ready" => {
                if state.phase != Phase::Lobby {
                    return Err(RulesError::illegal(action, "not in lobby"));
                }
                if state.ready.contains(&actor) {
                    return Err(RulesError::illegal(action, "already ready"));
                }
                next.ready.push(actor);
                next.ready.sort();
                let seated = next.seats.iter().filter(|s| !s.placeholder).count();
                if seated == 2 && next.ready.len() == 2 {
                    next.phase = Phase::Playing;
                }
            }
            "play" => {
                if state.phase != Phase::Playing {
                    return Err(RulesError::illegal(action, "round not in play"));
                }
                if state.turn != seat {
                    return Err(RulesError::illegal(action, "not your turn"));
                }
                let card = action
                    .get("card")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| RulesError::illegal(action, "missing card"))?;
                next.scores[seat] += card;
                next.played += 1;
                next.turn = (seat + 1) % 2;
                if next.played == Self::HAND_SIZE * 2 {
                    next.phase = Phase::Scoring;
                }
            }
            other => {
                return Err(RulesError::illegal(
                    action,
                    format!("unknown action type {other}"),
                ))
            }
        }
        next.action_log.push(action.id.clone());
        Ok(next)
    }

    fn action_log<'a>(&self, state: &'a MockState) -> &'a [ActionId] {
        &state.action_log
    }

    fn seats(&self, state: &MockState) -> [SeatPlayer; 2] {
        state.seats.clone()
    }

    fn dealer_seat(&self, state: &MockState) -> usize {
        state.dealer
    }

    fn is_scoring(&self, state: &MockState) -> bool {
        state.phase == Phase::Scoring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats() -> [SeatPlayer; 2] {
        [
            SeatPlayer::player(ClientId::new("host"), "Host"),
            SeatPlayer::player(ClientId::new("guest"), "Guest"),
        ]
    }

    fn ready(player: &str) -> Action {
        Action::new("ready").by(&ClientId::new(player))
    }

    fn play(player: &str, card: u64) -> Action {
        Action::new("play").by(&ClientId::new(player)).with("card", card)
    }

    #[test]
    fn both_ready_starts_play_left_of_dealer() {
        let rules = MockRules;
        let s = rules.new_game(&seats(), 0);
        let s = rules.apply(&s, &ready("host")).unwrap();
        assert_eq!(s.phase, Phase::Lobby);
        let s = rules.apply(&s, &ready("guest")).unwrap();
        assert_eq!(s.phase, Phase::Playing);
        assert_eq!(s.turn, 1);
    }

    #[test]
    fn play_before_ready_is_illegal() {
        let rules = MockRules;
        let s = rules.new_game(&seats(), 0);
        let err = rules.apply(&s, &play("guest", 3)).unwrap_err();
        assert_eq!(err.reason, "round not in play");
    }

    #[test]
    fn placeholder_seat_cannot_ready() {
        let rules = MockRules;
        let seats = [
            SeatPlayer::player(ClientId::new("host"), "Host"),
            SeatPlayer::placeholder(),
        ];
        let s = rules.new_game(&seats, 0);
        let s = rules.apply(&s, &ready("host")).unwrap();
        assert_eq!(s.phase, Phase::Lobby);
        assert!(rules.apply(&s, &ready(crate::PLACEHOLDER_ID)).is_err());
    }

    #[test]
    fn full_hand_reaches_scoring() {
        let rules = MockRules;
        let mut s = rules.new_game(&seats(), 0);
        for a in [
            ready("host"),
            ready("guest"),
            play("guest", 5),
            play("host", 2),
            play("guest", 1),
            play("host", 9),
        ] {
            s = rules.apply(&s, &a).unwrap();
        }
        assert!(rules.is_scoring(&s));
        assert_eq!(s.scores, [11, 6]);
        assert_eq!(rules.action_log(&s).len(), 6);
    }

    #[test]
    fn same_action_twice_is_rejected() {
        let rules = MockRules;
        let s = rules.new_game(&seats(), 0);
        let a = ready("host");
        let s = rules.apply(&s, &a).unwrap();
        assert!(rules.apply(&s, &a).is_err());
        assert!(rules.has_applied(&s, &a.id));
    }
}
