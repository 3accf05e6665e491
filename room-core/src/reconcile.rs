//! Arbitration between a cached snapshot and a replayed state.

use room_types::GameId;

use crate::hydrate::Hydration;
use crate::rules::GameRules;

/// Which candidate won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// The store's cached full-state snapshot.
    Cached,
    /// The replay of the action log.
    Replay,
}

/// A resolved state and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<S> {
    /// The chosen state.
    pub state: S,
    /// Which candidate it came from.
    pub source: StateSource,
}

/// Choose between the cached snapshot and a replay.
///
/// A replay that dropped anything is partial, so the cached snapshot wins if
/// there is one. Otherwise the strictly longer action log wins and ties go
/// to the cache.
pub fn resolve_incoming_state<R: GameRules>(
    rules: &R,
    cached: Option<R::State>,
    replay: Hydration<R::State>,
) -> Resolved<R::State> {
    let Some(cached) = cached else {
        return Resolved {
            state: replay.state,
            source: StateSource::Replay,
        };
    };

    if !replay.dropped.is_empty() {
        return Resolved {
            state: cached,
            source: StateSource::Cached,
        };
    }

    if rules.action_log(&replay.state).len() > rules.action_log(&cached).len() {
        Resolved {
            state: replay.state,
            source: StateSource::Replay,
        }
    } else {
        Resolved {
            state: cached,
            source: StateSource::Cached,
        }
    }
}

/// Whether an incoming snapshot would move local state backwards.
///
/// Only meaningful within one epoch: after an epoch change the action count
/// restarts, so a lower count is expected and never ignored.
pub fn should_ignore_regressive_snapshot(
    local_game_id: Option<&GameId>,
    local_action_count: usize,
    incoming_game_id: &GameId,
    incoming_action_count: usize,
) -> bool {
    local_game_id == Some(incoming_game_id) && incoming_action_count < local_action_count
}
