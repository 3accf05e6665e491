//! Mutual ping/ack presence tracking.
//!
//! Each client publishes a `ping_token` in its presence record and echoes
//! the freshest peer token it has seen in `ack_for_peer_ping_token`. A peer
//! counts as reachable only when both hold:
//! - its `last_seen_at` is within the seen timeout, and
//! - it echoed one of our tokens within the longer ACK timeout.
//!
//! Four presence fields are enough for a full round trip; no extra message
//! type is needed.

use room_types::{ClientId, PingToken, Presence, PresencePatch};
use std::collections::HashMap;
use std::time::Duration;

/// The two independent presence windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTimeouts {
    /// Maximum age of `last_seen_at`.
    pub seen: Duration,
    /// Maximum age of the last echoed token.
    pub ack: Duration,
}

impl Default for PresenceTimeouts {
    fn default() -> Self {
        Self {
            seen: Duration::from_secs(15),
            ack: Duration::from_secs(30),
        }
    }
}

/// Local view of the ping/ack round trips with every peer.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local: ClientId,
    token: PingToken,
    issued_at: i64,
    previous: Option<PingToken>,
    /// Peer -> (token it echoed, when).
    confirmed: HashMap<ClientId, (PingToken, i64)>,
    timeouts: PresenceTimeouts,
}

impl PresenceTracker {
    /// Start tracking with a freshly issued token.
    pub fn new(local: ClientId, now: i64, timeouts: PresenceTimeouts) -> Self {
        Self {
            local,
            token: PingToken::generate(),
            issued_at: now,
            previous: None,
            confirmed: HashMap::new(),
            timeouts,
        }
    }

    /// The token currently published.
    pub fn token(&self) -> &PingToken {
        &self.token
    }

    fn is_ours(&self, token: &PingToken) -> bool {
        token == &self.token || self.previous.as_ref() == Some(token)
    }

    /// Record echoes of our tokens found in peer presence records.
    pub fn observe(&mut self, participants: &[Presence]) {
        for peer in participants.iter().filter(|p| p.player_id != self.local) {
            let Some(echo) = &peer.ack_for_peer_ping_token else {
                continue;
            };
            if !self.is_ours(echo) {
                continue;
            }
            let at = peer.ack_at.unwrap_or(peer.last_seen_at);
            let newer = self
                .confirmed
                .get(&peer.player_id)
                .map_or(true, |(_, prev)| at >= *prev);
            if newer {
                self.confirmed
                    .insert(peer.player_id.clone(), (echo.clone(), at));
            }
        }
    }

    /// Build the next heartbeat patch.
    ///
    /// The token rotates once every present peer has echoed it, or when it
    /// has gone unanswered for the whole ACK window. The previous token stays
    /// acceptable for one more round so in-flight echoes still count.
    pub fn next_patch(&mut self, participants: &[Presence], now: i64) -> PresencePatch {
        self.observe(participants);

        let peers: Vec<&Presence> = participants
            .iter()
            .filter(|p| p.player_id != self.local)
            .collect();
        let all_echoed = !peers.is_empty()
            && peers.iter().all(|p| {
                self.confirmed
                    .get(&p.player_id)
                    .is_some_and(|(t, _)| t == &self.token)
            });
        let aged = now - self.issued_at >= self.timeouts.ack.as_millis() as i64;
        if all_echoed || aged {
            self.previous = Some(std::mem::replace(&mut self.token, PingToken::generate()));
            self.issued_at = now;
        }

        let mut patch = PresencePatch {
            last_seen_at: Some(now),
            ping_token: Some(self.token.clone()),
            ping_at: Some(self.issued_at),
            ..PresencePatch::default()
        };

        let freshest_ping = peers
            .iter()
            .filter_map(|p| Some((p.ping_token.as_ref()?, p.ping_at.unwrap_or(0))))
            .max_by_key(|(_, at)| *at);
        if let Some((token, _)) = freshest_ping {
            patch.ack_for_peer_ping_token = Some(token.clone());
            patch.ack_at = Some(now);
        }
        patch
    }

    /// Whether `peer` is both recently seen and recently round-tripped.
    pub fn is_reachable(&self, peer: &Presence, now: i64) -> bool {
        let seen_fresh = now - peer.last_seen_at <= self.timeouts.seen.as_millis() as i64;
        let acked_fresh = self
            .confirmed
            .get(&peer.player_id)
            .is_some_and(|(_, at)| now - at <= self.timeouts.ack.as_millis() as i64);
        seen_fresh && acked_fresh
    }

    /// Drop state for a departed peer.
    pub fn forget(&mut self, peer: &ClientId) {
        self.confirmed.remove(peer);
    }
}
