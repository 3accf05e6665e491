//! # room-core
//!
//! Pure logic for cardroom (no I/O, instant tests).
//!
//! This crate implements the algorithms that keep a room convergent without
//! any network or store I/O:
//! - Hydration: rebuild game state from an action log by fixed-point replay
//! - Reconciliation: pick between a cached snapshot and a replay
//! - Round control: who may start the next round, and when to take over
//! - Presence tracking: mutual ping/ack liveness
//! - Delivery: the per-peer ACK retry ladder and initiator election
//!
//! The actual I/O is performed by `room-store` and `room-client`, which
//! drive these functions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod delivery;
pub mod hydrate;
pub mod presence;
pub mod reconcile;
pub mod round;
pub mod rules;
pub mod seats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{
    is_initiator, DeliveryState, OfferBackoff, PendingAck, TimerOutcome, RETRY_LADDER,
};
pub use hydrate::{apply_incoming, hydrate_room_state, hydrate_snapshot, ApplyOutcome, Hydration};
pub use presence::{PresenceTimeouts, PresenceTracker};
pub use reconcile::{resolve_incoming_state, should_ignore_regressive_snapshot, Resolved, StateSource};
pub use round::{RoundContext, RoundControl, RoundLabel, RoundStatus};
pub use rules::{GameRules, MockRules, MockState, Phase, RulesError};
pub use seats::{canonical_order, next_dealer_seat, seat_players, SeatPlayer, PLACEHOLDER_ID};
