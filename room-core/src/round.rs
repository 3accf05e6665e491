//! Round control: who may start the next round.
//!
//! During scoring the seated dealer may always deal the next round. Anyone
//! else has to wait until the dealer's presence has gone stale for
//! `takeover_timeout`, after which they may take over. There is no lock:
//! two clients racing to start are arbitrated afterwards by the epoch check
//! in the store's round reset.

use room_types::ClientId;
use std::time::Duration;

/// Inputs for a round-control decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundContext {
    /// Whether the game is in its scoring phase.
    pub is_scoring: bool,
    /// The player asking.
    pub local_player: ClientId,
    /// The seated dealer.
    pub dealer: ClientId,
    /// Dealer's last heartbeat, `None` if the dealer has no presence record.
    pub dealer_last_seen_at: Option<i64>,
    /// Current time (unix millis).
    pub now: i64,
}

/// What the UI should offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundLabel {
    /// The round is still being played.
    NotScoring,
    /// The local player deals next.
    NextRound,
    /// Waiting on the dealer; takeover possible after `remaining`.
    WaitingForDealer {
        /// Time left until takeover is allowed.
        remaining: Duration,
    },
    /// The dealer is stale; the local player may take over.
    TakeOver,
}

/// Round-control decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStatus {
    /// Whether the local player may start the next round now.
    pub can_start_next_round: bool,
    /// What to show.
    pub label: RoundLabel,
}

/// Stale-dealer takeover policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundControl {
    takeover_timeout: Duration,
}

impl RoundControl {
    /// Default time a dealer may be silent before others can take over.
    pub const DEFAULT_TAKEOVER_TIMEOUT: Duration = Duration::from_secs(45);

    /// Create a policy with the given takeover timeout.
    pub fn new(takeover_timeout: Duration) -> Self {
        Self { takeover_timeout }
    }

    /// The configured takeover timeout.
    pub fn takeover_timeout(&self) -> Duration {
        self.takeover_timeout
    }

    /// Decide what the local player may do.
    pub fn status(&self, ctx: &RoundContext) -> RoundStatus {
        if !ctx.is_scoring {
            return RoundStatus {
                can_start_next_round: false,
                label: RoundLabel::NotScoring,
            };
        }
        if ctx.local_player == ctx.dealer {
            return RoundStatus {
                can_start_next_round: true,
                label: RoundLabel::NextRound,
            };
        }

        let timeout_ms = self.takeover_timeout.as_millis() as i64;
        let silent_ms = match ctx.dealer_last_seen_at {
            Some(seen) => (ctx.now - seen).max(0),
            None => timeout_ms,
        };

        if silent_ms >= timeout_ms {
            RoundStatus {
                can_start_next_round: true,
                label: RoundLabel::TakeOver,
            }
        } else {
            RoundStatus {
                can_start_next_round: false,
                label: RoundLabel::WaitingForDealer {
                    remaining: Duration::from_millis((timeout_ms - silent_ms) as u64),
                },
            }
        }
    }
}

impl Default for RoundControl {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TAKEOVER_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(local: &str, seen: Option<i64>, now: i64) -> RoundContext {
        RoundContext {
            is_scoring: true,
            local_player: ClientId::new(local),
            dealer: ClientId::new("dealer"),
            dealer_last_seen_at: seen,
            now,
        }
    }

    #[test]
    fn nobody_starts_outside_scoring() {
        let mut c = ctx("dealer", Some(0), 0);
        c.is_scoring = false;
        let status = RoundControl::default().status(&c);
        assert!(!status.can_start_next_round);
        assert_eq!(status.label, RoundLabel::NotScoring);
    }

    #[test]
    fn dealer_may_always_start() {
        let status = RoundControl::default().status(&ctx("dealer", Some(0), 999_999));
        assert!(status.can_start_next_round);
        assert_eq!(status.label, RoundLabel::NextRound);
    }

    #[test]
    fn stalled_dealer_counts_down_then_allows_takeover() {
        let control = RoundControl::new(Duration::from_secs(45));
        let seen = 1_000;

        let waiting = control.status(&ctx("other", Some(seen), seen + 30_000));
        assert!(!waiting.can_start_next_round);
        assert_eq!(
            waiting.label,
            RoundLabel::WaitingForDealer {
                remaining: Duration::from_secs(15)
            }
        );

        let takeover = control.status(&ctx("other", Some(seen), seen + 45_000));
        assert!(takeover.can_start_next_round);
        assert_eq!(takeover.label, RoundLabel::TakeOver);
    }

    #[test]
    fn departed_dealer_allows_immediate_takeover() {
        let status = RoundControl::default().status(&ctx("other", None, 0));
        assert!(status.can_start_next_round);
        assert_eq!(status.label, RoundLabel::TakeOver);
    }

    #[test]
    fn dealer_clock_ahead_counts_as_fresh() {
        let control = RoundControl::new(Duration::from_secs(10));
        let status = control.status(&ctx("other", Some(5_000), 1_000));
        assert_eq!(
            status.label,
            RoundLabel::WaitingForDealer {
                remaining: Duration::from_secs(10)
            }
        );
    }
}
