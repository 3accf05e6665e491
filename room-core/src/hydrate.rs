//! Hydration: rebuild game state from participants and action records.
//!
//! Records arrive from two racing paths (peer fast path, store log) in no
//! particular order, possibly duplicated. Replay therefore:
//! 1. dedupes by action id,
//! 2. sorts by `(created_at, id)`,
//! 3. applies in passes. An action the rules reject is deferred and retried
//!    after every pass that applied something; once a pass makes no
//!    progress, whatever is left is dropped and reported by id.
//!
//! Any permutation of the same record multiset hydrates to the same state.

use room_types::{Action, ActionId, ActionRecord, Presence, RoomSnapshot};
use std::collections::HashSet;

use crate::rules::{GameRules, RulesError};
use crate::seats::seat_players;

/// Result of replaying an action log.
#[derive(Debug, Clone, PartialEq)]
pub struct Hydration<S> {
    /// Replayed state.
    pub state: S,
    /// Actions applied, in application order.
    pub applied: Vec<ActionId>,
    /// Actions that never became legal.
    pub dropped: Vec<ActionId>,
    /// Replay passes performed.
    pub passes: usize,
}

impl<S> Hydration<S> {
    /// Whether every record was applied.
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Dedupe records by id and order them by `(created_at, id)`.
///
/// When the same id appears more than once the earliest copy wins.
pub fn order_records(records: &[ActionRecord]) -> Vec<&ActionRecord> {
    let mut ordered: Vec<&ActionRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    let mut seen = HashSet::new();
    ordered.retain(|r| seen.insert(r.id.clone()));
    ordered
}

/// Replay `records` from a fresh game for `participants`.
pub fn hydrate_room_state<R: GameRules>(
    rules: &R,
    participants: &[Presence],
    records: &[ActionRecord],
    dealer_seat: usize,
) -> Hydration<R::State> {
    let seats = seat_players(participants);
    let mut state = rules.new_game(&seats, dealer_seat);
    let mut pending: Vec<&Action> = order_records(records).into_iter().map(|r| &r.action).collect();
    let mut applied = Vec::new();
    let mut passes = 0;

    while !pending.is_empty() {
        passes += 1;
        let mut deferred = Vec::new();
        let mut progressed = false;

        for action in pending {
            if rules.has_applied(&state, &action.id) {
                continue;
            }
            match rules.apply(&state, action) {
                Ok(next) => {
                    state = next;
                    applied.push(action.id.clone());
                    progressed = true;
                }
                Err(_) => deferred.push(action),
            }
        }

        pending = deferred;
        if !progressed {
            break;
        }
    }

    Hydration {
        state,
        applied,
        dropped: pending.into_iter().map(|a| a.id.clone()).collect(),
        passes,
    }
}

/// Replay a store snapshot, dealing from the epoch's recorded dealer seat.
pub fn hydrate_snapshot<R: GameRules>(rules: &R, snapshot: &RoomSnapshot) -> Hydration<R::State> {
    hydrate_room_state(
        rules,
        &snapshot.participants,
        &snapshot.actions,
        snapshot.meta.dealer_seat,
    )
}

/// Outcome of applying a single incoming action to local state.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome<S> {
    /// The action was new and legal.
    Applied(S),
    /// The action id is already in the log; nothing to do.
    AlreadyApplied,
    /// The rules rejected the action.
    Rejected(RulesError),
}

/// Apply one action unless it is already part of `state`.
///
/// This is the duplicate-delivery short-circuit shared by the optimistic
/// local path and the peer fast path.
pub fn apply_incoming<R: GameRules>(
    rules: &R,
    state: &R::State,
    action: &Action,
) -> ApplyOutcome<R::State> {
    if rules.has_applied(state, &action.id) {
        return ApplyOutcome::AlreadyApplied;
    }
    match rules.apply(state, action) {
        Ok(next) => ApplyOutcome::Applied(next),
        Err(e) => ApplyOutcome::Rejected(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{MockRules, Phase};
    use room_types::{ClientId, GameId, Role};

    fn participants() -> Vec<Presence> {
        vec![
            Presence::joined(ClientId::new("host"), "Host", Role::Host, 1),
            Presence::joined(ClientId::new("guest"), "Guest", Role::Guest, 2),
        ]
    }

    fn record(id: &str, at: i64, action: Action) -> ActionRecord {
        let actor = action.actor().unwrap_or_else(|| ClientId::new("?"));
        let action = Action {
            id: ActionId::new(id),
            ..action
        };
        ActionRecord {
            id: ActionId::new(id),
            game_id: GameId::new("g1"),
            action,
            actor_id: actor,
            created_at: at,
        }
    }

    fn ready(p: &str) -> Action {
        Action::new("ready").by(&ClientId::new(p))
    }

    fn play(p: &str, card: u64) -> Action {
        Action::new("play").by(&ClientId::new(p)).with("card", card)
    }

    fn game_records() -> Vec<ActionRecord> {
        vec![
            record("a1", 10, ready("host")),
            record("a2", 20, ready("guest")),
            record("a3", 30, play("guest", 4)),
            record("a4", 40, play("host", 6)),
        ]
    }

    // ===========================================
    // Ordering
    // ===========================================

    #[test]
    fn records_sorted_by_time_then_id_and_deduped() {
        let mut records = game_records();
        records.push(record("a0", 20, ready("host")));
        records.push(record("a2", 99, ready("guest")));
        let ids: Vec<&str> = order_records(&records).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a0", "a2", "a3", "a4"]);
    }

    // ===========================================
    // Replay
    // ===========================================

    #[test]
    fn in_order_log_replays_in_one_pass() {
        let h = hydrate_room_state(&MockRules, &participants(), &game_records(), 0);
        assert!(h.is_complete());
        assert_eq!(h.passes, 1);
        assert_eq!(h.state.phase, Phase::Playing);
        assert_eq!(h.state.scores, [6, 4]);
    }

    #[test]
    fn causally_early_action_is_deferred_then_applied() {
        // Guest's play was stamped before both readies landed.
        let records = vec![
            record("a3", 5, play("guest", 4)),
            record("a1", 10, ready("host")),
            record("a2", 20, ready("guest")),
        ];
        let h = hydrate_room_state(&MockRules, &participants(), &records, 0);
        assert!(h.is_complete());
        assert_eq!(h.passes, 2);
        let log: Vec<&str> = h.state.action_log.iter().map(|a| a.as_str()).collect();
        assert_eq!(log, vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn permanently_illegal_actions_are_dropped_and_reported() {
        let mut records = game_records();
        records.push(record("bad", 50, play("stranger", 1)));
        records.push(record("bad2", 60, Action::new("dance").by(&ClientId::new("host"))));
        let h = hydrate_room_state(&MockRules, &participants(), &records, 0);
        assert_eq!(h.applied.len(), 4);
        assert_eq!(h.dropped, vec![ActionId::new("bad"), ActionId::new("bad2")]);
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![Vec::new()];
        }
        let mut out = Vec::new();
        for shorter in permutations(n - 1) {
            for at in 0..=shorter.len() {
                let mut p = shorter.clone();
                p.insert(at, n - 1);
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn every_permutation_converges() {
        let base = vec![
            record("a1", 10, ready("host")),
            record("a2", 10, ready("guest")),
            record("a3", 10, play("guest", 4)),
            record("a4", 10, play("host", 6)),
        ];
        let expected = hydrate_room_state(&MockRules, &participants(), &base, 0).state;
        let orders = permutations(base.len());
        assert_eq!(orders.len(), 24);
        for order in orders {
            let mut records = base.clone();
            for (r, at) in records.iter_mut().zip(&order) {
                r.created_at = *at as i64;
            }
            let h = hydrate_room_state(&MockRules, &participants(), &records, 0);
            assert!(h.is_complete(), "order {order:?} dropped {:?}", h.dropped);
            assert_eq!(h.state.scores, expected.scores);
            assert_eq!(h.state.phase, expected.phase);
        }
    }

    #[test]
    fn lone_host_hydrates_against_placeholder() {
        let host = vec![participants().remove(0)];
        let h = hydrate_room_state(&MockRules, &host, &[record("a1", 1, ready("host"))], 0);
        assert!(h.state.seats[1].placeholder);
        assert_eq!(h.state.phase, Phase::Lobby);
    }

    // ===========================================
    // Incoming actions
    // ===========================================

    #[test]
    fn duplicate_incoming_action_short_circuits() {
        let rules = MockRules;
        let state = rules.new_game(&seat_players(&participants()), 0);
        let a = ready("host");
        let state = match apply_incoming(&rules, &state, &a) {
            ApplyOutcome::Applied(s) => s,
            other => panic!("expected Applied, got {:?}", other),
        };
        assert_eq!(apply_incoming(&rules, &state, &a), ApplyOutcome::AlreadyApplied);
    }

    #[test]
    fn illegal_incoming_action_is_rejected() {
        let rules = MockRules;
        let state = rules.new_game(&seat_players(&participants()), 0);
        assert!(matches!(
            apply_incoming(&rules, &state, &play("host", 1)),
            ApplyOutcome::Rejected(_)
        ));
    }
}
