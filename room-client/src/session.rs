//! RoomSession - everything one room join owns.
//!
//! A session is created by [`RoomSession::join`] and torn down by
//! [`RoomSession::leave`]. In between it owns:
//! - the [`RoomClient`] (peer fast path),
//! - the room snapshot subscription (durable path),
//! - the presence heartbeat task and its [`PresenceTracker`],
//! - the local game state and the epoch it belongs to.
//!
//! Nothing is global: two sessions in one process are fully independent.
//!
//! Local actions are applied optimistically, broadcast to peers, then
//! appended to the store. Actions from peers and snapshots from the store
//! are folded in by [`RoomSession::next_update`]; both paths may deliver
//! the same action and both are idempotent.

use crate::client::{ClientError, ClientOptions, JoinMode, RoomClient, RoomEvent};
use crate::config::SessionConfig;
use crate::signaling::Signaling;
use crate::transport::PeerConnector;
use room_core::{
    apply_incoming, hydrate_snapshot, resolve_incoming_state, should_ignore_regressive_snapshot,
    ApplyOutcome, GameRules, PresenceTracker, Resolved, RoundContext, RoundControl, RoundLabel,
    RoundStatus, RulesError,
};
use room_store::{KvBackend, PlayerProfile, RoomStore, SnapshotSubscription, StoreError};
use room_types::{Action, ClientId, GameId, PeerMessage, RoomId, RoomSnapshot};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Client error.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The local action is illegal.
    #[error("rejected: {0}")]
    Rejected(#[from] RulesError),

    /// Round control does not allow starting the next round yet.
    #[error("cannot start the next round: {0:?}")]
    RoundLocked(RoundLabel),
}

/// Who joins which room.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    /// Room to join (created when it has no metadata yet).
    pub room_id: RoomId,
    /// The local player.
    pub player: PlayerProfile,
    /// Capacity used if the room has to be created.
    pub expected_players: u32,
}

/// What happened to a locally dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The action was new and applied to local state.
    pub applied: bool,
    /// The action reached the store's log.
    ///
    /// `false` after a failed or stale-epoch append; the action still went
    /// out on the fast path and re-queueing is up to the caller.
    pub persisted: bool,
}

/// Something the UI may want to redraw for.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Local game state changed within the current epoch.
    StateChanged,
    /// The room moved to a new epoch; local state was replaced.
    EpochChanged(GameId),
    /// A direct channel to a peer opened.
    PeerConnected(ClientId),
    /// A peer disconnected or left.
    PeerDisconnected(ClientId),
    /// The room no longer exists in the store.
    RoomClosed,
    /// Reading the store failed; the subscription keeps going.
    StoreError(String),
    /// The signaling relay reported an error.
    SignalingError(String),
}

/// One room join.
pub struct RoomSession<R, B, C, S>
where
    R: GameRules,
    B: KvBackend,
    C: PeerConnector,
    S: Signaling,
{
    rules: Arc<R>,
    store: RoomStore<B>,
    room_id: RoomId,
    player: PlayerProfile,
    client: RoomClient<C, S>,
    client_events: mpsc::UnboundedReceiver<RoomEvent>,
    snapshots: SnapshotSubscription,
    heartbeat: JoinHandle<()>,
    tracker: Arc<Mutex<PresenceTracker>>,
    round_control: RoundControl,
    state: R::State,
    game_id: GameId,
    /// Epochs this session has left. Late results from them are discarded.
    retired: HashSet<GameId>,
    snapshot: RoomSnapshot,
}

impl<R, B, C, S> std::fmt::Debug for RoomSession<R, B, C, S>
where
    R: GameRules,
    B: KvBackend,
    C: PeerConnector,
    S: Signaling,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", &self.room_id)
            .field("player", &self.player.id)
            .field("game_id", &self.game_id)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl<R, B, C, S> RoomSession<R, B, C, S>
where
    R: GameRules,
    B: KvBackend,
    C: PeerConnector,
    S: Signaling,
{
    /// Join (or create) a room and start syncing it.
    pub async fn join(
        rules: Arc<R>,
        store: RoomStore<B>,
        request: JoinRequest,
        connector: C,
        signaling: S,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let JoinRequest {
            room_id,
            player,
            expected_players,
        } = request;

        let snapshot = store
            .join_room(rules.as_ref(), &room_id, &player, expected_players)
            .await?;
        let mode = if snapshot.meta.host_id == player.id {
            JoinMode::Create
        } else {
            JoinMode::Join
        };
        let resolved = resolve_snapshot(rules.as_ref(), &snapshot);

        let options = ClientOptions {
            offer_backoff: config.offer_backoff(),
            ..ClientOptions::default()
        };
        let (client, client_events) = RoomClient::connect(
            player.id.clone(),
            room_id.clone(),
            mode,
            connector,
            signaling,
            options,
        )
        .await?;
        let game_id = snapshot.game_id().clone();
        client.set_game_id(game_id.clone());

        let mut tracker = PresenceTracker::new(player.id.clone(), store.now(), config.presence_timeouts());
        tracker.observe(&snapshot.participants);
        let tracker = Arc::new(Mutex::new(tracker));
        let heartbeat = spawn_heartbeat(
            store.clone(),
            room_id.clone(),
            player.id.clone(),
            Arc::clone(&tracker),
            config.heartbeat_interval(),
        );
        let snapshots = store.subscribe_room_snapshot(&room_id, true);

        tracing::info!(
            room = %room_id,
            player = %player.id,
            epoch = %game_id,
            source = ?resolved.source,
            "Joined room"
        );

        Ok(Self {
            rules,
            store,
            room_id,
            player,
            client,
            client_events,
            snapshots,
            heartbeat,
            tracker,
            round_control: config.round_control(),
            state: resolved.state,
            game_id,
            retired: HashSet::new(),
            snapshot,
        })
    }

    /// The room.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The local player.
    pub fn player_id(&self) -> &ClientId {
        &self.player.id
    }

    /// Current local game state.
    pub fn state(&self) -> &R::State {
        &self.state
    }

    /// Epoch the local state belongs to.
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    /// Last room snapshot seen.
    pub fn snapshot(&self) -> &RoomSnapshot {
        &self.snapshot
    }

    /// The underlying room client.
    pub fn client(&self) -> &RoomClient<C, S> {
        &self.client
    }

    fn tracker(&self) -> MutexGuard<'_, PresenceTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Local actions
    // =========================================================================

    /// Apply a local action, send it to peers and append it to the store.
    ///
    /// An action already in local state is a no-op. An illegal action is
    /// rejected before anything is sent.
    pub async fn dispatch(&mut self, action: Action) -> Result<DispatchOutcome, SessionError> {
        let next = match apply_incoming(self.rules.as_ref(), &self.state, &action) {
            ApplyOutcome::Applied(next) => next,
            ApplyOutcome::AlreadyApplied => {
                return Ok(DispatchOutcome {
                    applied: false,
                    persisted: false,
                })
            }
            ApplyOutcome::Rejected(e) => return Err(e.into()),
        };
        self.state = next;

        self.client
            .send(PeerMessage::Action {
                from: self.player.id.clone(),
                game_id: self.game_id.clone(),
                action: action.clone(),
            })
            .await?;

        let persisted = self.persist(&action).await;
        Ok(DispatchOutcome {
            applied: true,
            persisted,
        })
    }

    async fn persist(&self, action: &Action) -> bool {
        let appended = self
            .store
            .append_action(&self.room_id, &self.player.id, action, Some(&self.game_id))
            .await;
        match appended {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(action = %action.id, epoch = %self.game_id, "Append skipped");
                return false;
            }
            Err(e) => {
                tracing::warn!(
                    action = %action.id,
                    retryable = e.is_retryable(),
                    "Append failed: {}",
                    e
                );
                return false;
            }
        }

        if let Err(e) = self
            .store
            .upsert_game_state(&self.room_id, &self.state, Some(&self.game_id))
            .await
        {
            tracing::warn!(room = %self.room_id, "Caching game state failed: {}", e);
        }
        true
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Wait for the next change worth reporting.
    ///
    /// Folds in peer actions, sync requests and store snapshots as they
    /// arrive; returns `None` once both feeds have stopped.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let update = tokio::select! {
                event = self.client_events.recv() => match event {
                    Some(event) => self.on_room_event(event).await,
                    None => return None,
                },
                update = self.snapshots.recv() => match update {
                    Some(Ok(Some(snapshot))) => self.on_snapshot(snapshot),
                    Some(Ok(None)) => Some(SessionUpdate::RoomClosed),
                    Some(Err(e)) => {
                        tracing::warn!(room = %self.room_id, "Room subscription error: {}", e);
                        Some(SessionUpdate::StoreError(e.to_string()))
                    }
                    None => return None,
                },
            };
            if update.is_some() {
                return update;
            }
        }
    }

    async fn on_room_event(&mut self, event: RoomEvent) -> Option<SessionUpdate> {
        match event {
            RoomEvent::Action {
                from,
                game_id,
                action,
            } => {
                if game_id == self.game_id {
                    return self.on_remote_action(&from, &action);
                }
                if self.retired.contains(&game_id) {
                    tracing::debug!(
                        peer = %from,
                        action = %action.id,
                        epoch = %game_id,
                        "Dropping action from a finished epoch"
                    );
                    return None;
                }
                // The peer is ahead of us; catch up through the store.
                tracing::debug!(peer = %from, epoch = %game_id, "Action from an unseen epoch, pulling room");
                match self.sync_from_store().await {
                    Ok(update) => update,
                    Err(e) => Some(SessionUpdate::StoreError(e.to_string())),
                }
            }
            RoomEvent::SyncRequested { from, .. } => {
                tracing::info!(peer = %from, "Peer requested sync, pulling room");
                match self.sync_from_store().await {
                    Ok(update) => update,
                    Err(e) => Some(SessionUpdate::StoreError(e.to_string())),
                }
            }
            RoomEvent::PeerConnected(peer) => Some(SessionUpdate::PeerConnected(peer)),
            RoomEvent::PeerDisconnected(peer) => {
                self.tracker().forget(&peer);
                Some(SessionUpdate::PeerDisconnected(peer))
            }
            RoomEvent::SignalingError(message) => Some(SessionUpdate::SignalingError(message)),
        }
    }

    fn on_remote_action(&mut self, from: &ClientId, action: &Action) -> Option<SessionUpdate> {
        match apply_incoming(self.rules.as_ref(), &self.state, action) {
            ApplyOutcome::Applied(next) => {
                self.state = next;
                Some(SessionUpdate::StateChanged)
            }
            ApplyOutcome::AlreadyApplied => None,
            ApplyOutcome::Rejected(e) => {
                // Possibly causally early; the store replay will place it.
                tracing::debug!(peer = %from, "Peer action not applicable yet: {}", e);
                None
            }
        }
    }

    fn on_snapshot(&mut self, snapshot: RoomSnapshot) -> Option<SessionUpdate> {
        let incoming = snapshot.game_id().clone();
        if self.retired.contains(&incoming) {
            tracing::trace!(epoch = %incoming, "Ignoring snapshot from a finished epoch");
            return None;
        }
        self.tracker().observe(&snapshot.participants);

        if incoming != self.game_id {
            let resolved = resolve_snapshot(self.rules.as_ref(), &snapshot);
            tracing::info!(
                room = %self.room_id,
                from = %self.game_id,
                to = %incoming,
                "Adopting new epoch"
            );
            self.state = resolved.state;
            let previous = std::mem::replace(&mut self.game_id, incoming.clone());
            self.retired.insert(previous);
            self.client.set_game_id(incoming.clone());
            self.snapshot = snapshot;
            return Some(SessionUpdate::EpochChanged(incoming));
        }

        let local_count = self.rules.action_log(&self.state).len();
        if should_ignore_regressive_snapshot(
            Some(&self.game_id),
            local_count,
            &incoming,
            snapshot.actions.len(),
        ) {
            tracing::trace!(local_count, incoming = snapshot.actions.len(), "Ignoring regressive snapshot");
            self.snapshot = snapshot;
            return None;
        }

        let resolved = resolve_snapshot(self.rules.as_ref(), &snapshot);
        self.snapshot = snapshot;
        let resolved_count = self.rules.action_log(&resolved.state).len();
        if resolved_count < local_count || resolved.state == self.state {
            return None;
        }
        self.state = resolved.state;
        Some(SessionUpdate::StateChanged)
    }

    /// Pull the room from the store and reconcile with it.
    pub async fn sync_from_store(&mut self) -> Result<Option<SessionUpdate>, SessionError> {
        match self.store.fetch_room_snapshot(&self.room_id, true).await? {
            Some(snapshot) => Ok(self.on_snapshot(snapshot)),
            None => Ok(Some(SessionUpdate::RoomClosed)),
        }
    }

    // =========================================================================
    // Rounds
    // =========================================================================

    /// What the local player may do about the next round.
    pub fn round_status(&self) -> RoundStatus {
        let seats = self.rules.seats(&self.state);
        let dealer = &seats[self.rules.dealer_seat(&self.state) % 2];
        let dealer_last_seen_at = self.snapshot.participant(&dealer.id).map(|p| p.last_seen_at);
        self.round_control.status(&RoundContext {
            is_scoring: self.rules.is_scoring(&self.state),
            local_player: self.player.id.clone(),
            dealer: dealer.id.clone(),
            dealer_last_seen_at,
            now: self.store.now(),
        })
    }

    /// Start the next round if round control allows it.
    ///
    /// Returns the epoch now in effect. When another client won the race,
    /// that is their epoch and local state follows it.
    pub async fn start_next_round(&mut self) -> Result<GameId, SessionError> {
        let status = self.round_status();
        if !status.can_start_next_round {
            return Err(SessionError::RoundLocked(status.label));
        }
        if status.label == RoundLabel::TakeOver {
            tracing::info!(room = %self.room_id, player = %self.player.id, "Taking over stale dealer");
        }
        let snapshot = self
            .store
            .reset_round_session(self.rules.as_ref(), &self.room_id, Some(&self.game_id))
            .await?;
        self.on_snapshot(snapshot);
        Ok(self.game_id.clone())
    }

    /// Start a new game from scratch. Returns the epoch now in effect.
    pub async fn restart_game(&mut self) -> Result<GameId, SessionError> {
        let snapshot = self
            .store
            .restart_game_session(self.rules.as_ref(), &self.room_id, Some(&self.game_id))
            .await?;
        self.on_snapshot(snapshot);
        Ok(self.game_id.clone())
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Whether `peer` is both recently seen and recently round-tripped.
    pub fn peer_reachable(&self, peer: &ClientId) -> bool {
        let Some(presence) = self.snapshot.participant(peer) else {
            return false;
        };
        self.tracker().is_reachable(presence, self.store.now())
    }

    /// Tear everything down and remove the local player from the room.
    pub async fn leave(self) -> Result<(), SessionError> {
        self.heartbeat.abort();
        self.client.destroy().await;
        self.store.leave_room(&self.room_id, &self.player.id).await?;
        tracing::info!(room = %self.room_id, player = %self.player.id, "Left room");
        Ok(())
    }
}

impl<R, B, C, S> Drop for RoomSession<R, B, C, S>
where
    R: GameRules,
    B: KvBackend,
    C: PeerConnector,
    S: Signaling,
{
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

fn resolve_snapshot<R: GameRules>(rules: &R, snapshot: &RoomSnapshot) -> Resolved<R::State> {
    let cached = snapshot
        .game_state
        .clone()
        .and_then(|value| match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(room = %snapshot.meta.room_id, "Ignoring undecodable cached state: {}", e);
                None
            }
        });
    resolve_incoming_state(rules, cached, hydrate_snapshot(rules, snapshot))
}

fn spawn_heartbeat<B: KvBackend>(
    store: RoomStore<B>,
    room_id: RoomId,
    player_id: ClientId,
    tracker: Arc<Mutex<PresenceTracker>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        loop {
            timer.tick().await;
            let participants = match store.fetch_room_snapshot(&room_id, false).await {
                Ok(Some(snapshot)) => snapshot.participants,
                Ok(None) => {
                    tracing::debug!(room = %room_id, "Room gone, heartbeat idle");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(room = %room_id, "Heartbeat read failed: {}", e);
                    continue;
                }
            };
            let patch = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next_patch(&participants, store.now());
            match store.touch_presence(&room_id, &player_id, &patch).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(room = %room_id, player = %player_id, "No presence record to touch"),
                Err(e) => tracing::warn!(room = %room_id, "Heartbeat write failed: {}", e),
            }
        }
    })
}
