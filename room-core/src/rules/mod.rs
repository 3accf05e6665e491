//! The game-rules seam.
//!
//! The card game itself lives outside this workspace. Everything here only
//! needs a pure, deterministic reducer that rejects illegal input, plus a
//! few read accessors on the state it produces.
//!
//! [`MockRules`] is a tiny two-seat game with real causal dependencies,
//! used by tests across the workspace.

mod mock;

pub use mock::{MockRules, MockState, Phase};

use room_types::{Action, ActionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::seats::SeatPlayer;

/// An action was rejected by the rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal action {action_id}: {reason}")]
pub struct RulesError {
    /// The rejected action.
    pub action_id: ActionId,
    /// Why it was rejected.
    pub reason: String,
}

impl RulesError {
    /// Reject `action` for `reason`.
    pub fn illegal(action: &Action, reason: impl Into<String>) -> Self {
        Self {
            action_id: action.id.clone(),
            reason: reason.into(),
        }
    }
}

/// A pure game reducer over a two-seat state.
pub trait GameRules: Send + Sync + 'static {
    /// Full game state; also the cached snapshot stored in the room.
    type State: Clone
        + PartialEq
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// A freshly dealt game for the given seats.
    fn new_game(&self, seats: &[SeatPlayer; 2], dealer_seat: usize) -> Self::State;

    /// Apply one action. Must be deterministic and must not mutate `state`.
    fn apply(&self, state: &Self::State, action: &Action) -> Result<Self::State, RulesError>;

    /// Ids of every action applied so far, in application order.
    fn action_log<'a>(&self, state: &'a Self::State) -> &'a [ActionId];

    /// Seats of the game.
    fn seats(&self, state: &Self::State) -> [SeatPlayer; 2];

    /// Seat index of the current dealer.
    fn dealer_seat(&self, state: &Self::State) -> usize;

    /// Whether the round is over and the next one may be started.
    fn is_scoring(&self, state: &Self::State) -> bool;

    /// Whether `action_id` is already part of `state`.
    fn has_applied(&self, state: &Self::State, action_id: &ActionId) -> bool {
        self.action_log(state).contains(action_id)
    }
}
