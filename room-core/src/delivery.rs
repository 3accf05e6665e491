//! Reliable-delivery state machine for peer actions.
//!
//! Each `(action id, peer)` pair moves through
//! `Pending -> Retrying(1..=5) -> Exhausted`. Retransmissions follow
//! [`RETRY_LADDER`], landing at cumulative offsets 1s, 3s, 7s, 15s and 30s.
//! After the last one the peer is sent a single `syncRequest` and never
//! retried again: it is expected to pull from the store instead.
//!
//! Like the connection state machine this is pure; `room-client` owns the
//! timers and performs the sends.

use room_types::{ClientId, GameId, PeerMessage};
use std::time::Duration;

/// Delay before each retransmission, relative to the previous one.
pub const RETRY_LADDER: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(15),
];

/// Delivery state of one action to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Sent once, waiting for the first timer.
    Pending,
    /// Retransmitted `attempt` times.
    Retrying {
        /// Retransmissions so far.
        attempt: usize,
    },
    /// Ladder exhausted; peer was asked to sync instead.
    Exhausted,
}

/// What to do when a retry timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Retransmit and re-arm the timer for `next_delay`.
    Retransmit {
        /// Delay until the next timer.
        next_delay: Duration,
    },
    /// Retransmit one last time, send a `syncRequest`, stop tracking.
    RetransmitAndExhaust,
}

/// An unacknowledged action addressed to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    /// The message to retransmit.
    pub message: PeerMessage,
    /// Retransmissions performed.
    pub retry_index: usize,
    /// When tracking started (unix millis).
    pub started_at: i64,
}

impl PendingAck {
    /// Start tracking `message`.
    pub fn new(message: PeerMessage, started_at: i64) -> Self {
        Self {
            message,
            retry_index: 0,
            started_at,
        }
    }

    /// Epoch of the tracked action, if the message carries one.
    pub fn game_id(&self) -> Option<&GameId> {
        match &self.message {
            PeerMessage::Action { game_id, .. } => Some(game_id),
            _ => None,
        }
    }

    /// Whether the tracked message belongs to an epoch other than `current`.
    pub fn is_stale(&self, current: &GameId) -> bool {
        self.game_id().is_some_and(|g| g != current)
    }

    /// Delay before the first timer.
    pub fn first_delay() -> Duration {
        RETRY_LADDER[0]
    }

    /// Current state.
    pub fn state(&self) -> DeliveryState {
        match self.retry_index {
            0 => DeliveryState::Pending,
            n if n < RETRY_LADDER.len() => DeliveryState::Retrying { attempt: n },
            _ => DeliveryState::Exhausted,
        }
    }

    /// Advance on a timer firing.
    pub fn on_timer(&mut self) -> TimerOutcome {
        self.retry_index += 1;
        match RETRY_LADDER.get(self.retry_index) {
            Some(next_delay) => TimerOutcome::Retransmit {
                next_delay: *next_delay,
            },
            None => TimerOutcome::RetransmitAndExhaust,
        }
    }
}

/// Whether `local` initiates the connection with `remote`.
///
/// Exactly one side of every pair sees `true`, so only one offer is made.
pub fn is_initiator(local: &ClientId, remote: &ClientId) -> bool {
    local < remote
}

/// Bounded, linearly backed-off offer attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferBackoff {
    attempts: u32,
    step: Duration,
}

impl OfferBackoff {
    /// Allow `attempts` tries, waiting `step * n` before try `n` (0-based).
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self { attempts, step }
    }

    /// Delay before attempt `attempt`, or `None` once attempts are used up.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then(|| self.step * attempt)
    }
}

impl Default for OfferBackoff {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}
