//! Room store operations.
//!
//! The backend offers no compare-and-swap, so every guarded write is a
//! read-compare-write on the room's epoch token (`meta.currentGameId`).
//! Stale writes are no-ops rather than errors; two writers racing inside
//! the same window can both succeed, and the loser is discarded later by
//! the next epoch comparison.

use crate::backend::KvBackend;
use crate::config::StoreSettings;
use crate::error::{StoreError, StoreResult};
use crate::paths::{self, check_key};
use crate::subscription::{SnapshotSubscription, Subscription};
use room_core::hydrate::order_records;
use room_core::{
    canonical_order, hydrate_room_state, hydrate_snapshot, next_dealer_seat, seat_players, Clock,
    GameRules, SystemClock,
};
use room_types::{
    Action, ActionRecord, ClientId, GameId, Presence, PresencePatch, Role, RoomId, RoomMeta,
    RoomSnapshot, RoomStatus,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Smallest room.
pub const MIN_PLAYERS: u32 = 2;
/// Largest room.
pub const MAX_PLAYERS: u32 = 4;

/// Who is creating or joining a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    /// Player id (a valid store key).
    pub id: ClientId,
    /// Display name.
    pub name: String,
}

impl PlayerProfile {
    /// Create a profile.
    pub fn new(id: impl Into<ClientId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// How a new epoch is dealt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    /// Start over with seat 0 dealing.
    Restart,
    /// Next round: the deal passes on from the prior dealer.
    NextRound,
}

/// Replicated room store over a keyed backend.
pub struct RoomStore<B: KvBackend> {
    pub(crate) backend: Arc<B>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: StoreSettings,
}

impl<B: KvBackend> Clone for RoomStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            settings: self.settings.clone(),
        }
    }
}

impl<B: KvBackend> std::fmt::Debug for RoomStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomStore")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<B: KvBackend> RoomStore<B> {
    /// Create a store stamping records with the system clock.
    pub fn new(backend: Arc<B>, settings: StoreSettings) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Use a different clock for record timestamps and TTLs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Store settings.
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// The store's own clock (unix millis).
    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    // =========================================================================
    // Room lifecycle
    // =========================================================================

    /// Create a room with `host` as its lone participant.
    ///
    /// Overwrites whatever was stored under the room id.
    pub async fn create_room<R: GameRules>(
        &self,
        rules: &R,
        room_id: &RoomId,
        host: &PlayerProfile,
        expected_players: u32,
    ) -> StoreResult<RoomSnapshot> {
        check_key(room_id.as_str())?;
        check_key(host.id.as_str())?;
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&expected_players) {
            return Err(StoreError::InvalidArgument(format!(
                "expected players must be {MIN_PLAYERS}..={MAX_PLAYERS}, got {expected_players}"
            )));
        }

        let now = self.now();
        let presence = Presence::joined(host.id.clone(), host.name.clone(), Role::Host, now);
        let participants = vec![presence];
        let meta = RoomMeta {
            room_id: room_id.clone(),
            host_id: host.id.clone(),
            expected_players,
            current_game_id: GameId::generate(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.settings.room_ttl_ms(),
            status: RoomStatus::Waiting,
            dealer_seat: 0,
        };
        let state = rules.new_game(&seat_players(&participants), 0);
        let state = serde_json::to_value(&state)?;

        let mut roster = Map::new();
        roster.insert(host.id.to_string(), serde_json::to_value(&participants[0])?);
        self.backend
            .put(
                &paths::room(room_id),
                json!({
                    "meta": meta,
                    "participants": roster,
                    "gameState": state,
                }),
            )
            .await?;

        tracing::info!(room = %room_id, host = %host.id, epoch = %meta.current_game_id, "Room created");
        self.publish_directory(&meta, &participants).await;

        Ok(RoomSnapshot {
            meta,
            participants,
            actions: Vec::new(),
            game_state: Some(state),
            game_state_included: true,
        })
    }

    /// Join a room, creating it when it has no metadata yet.
    ///
    /// A player already in the room keeps its `joinedAt` and role; anyone
    /// else is refused once the room is full.
    pub async fn join_room<R: GameRules>(
        &self,
        rules: &R,
        room_id: &RoomId,
        player: &PlayerProfile,
        expected_players: u32,
    ) -> StoreResult<RoomSnapshot> {
        check_key(room_id.as_str())?;
        check_key(player.id.as_str())?;

        let Some(mut meta) = self.read_meta(room_id).await? else {
            tracing::debug!(room = %room_id, player = %player.id, "No metadata, creating room on join");
            return self.create_room(rules, room_id, player, expected_players).await;
        };
        let mut participants = self.read_participants(room_id).await?;

        let now = self.now();
        let existing = participants.iter().position(|p| p.player_id == player.id);
        if existing.is_none() && meta.is_full(participants.len()) {
            return Err(StoreError::RoomFull {
                room_id: room_id.clone(),
                capacity: meta.expected_players,
            });
        }

        let presence = match existing {
            Some(idx) => {
                let mut presence = participants[idx].clone();
                presence.name = player.name.clone();
                presence.last_seen_at = now;
                participants[idx] = presence.clone();
                presence
            }
            None => {
                let presence = Presence::joined(player.id.clone(), player.name.clone(), Role::Guest, now);
                participants.push(presence.clone());
                presence
            }
        };
        self.backend
            .put(
                &paths::participant(room_id, &player.id),
                serde_json::to_value(&presence)?,
            )
            .await?;

        meta.status = status_for(&meta, participants.len());
        meta.updated_at = now;
        meta.expires_at = now + self.settings.room_ttl_ms();
        self.backend
            .patch(&paths::meta(room_id), meta_touch_fields(&meta))
            .await?;

        if existing.is_none() {
            // Reseat the cached state so a late joiner's fetch sees both seats.
            let actions = self.read_actions(room_id, &meta.current_game_id).await?;
            let hydration = hydrate_room_state(rules, &participants, &actions, meta.dealer_seat);
            self.backend
                .put(
                    &paths::game_state(room_id),
                    serde_json::to_value(&hydration.state)?,
                )
                .await?;
            tracing::info!(room = %room_id, player = %player.id, "Player joined");
        } else {
            tracing::debug!(room = %room_id, player = %player.id, "Player re-joined");
        }

        self.publish_directory(&meta, &participants).await;

        self.fetch_room_snapshot(room_id, true)
            .await?
            .ok_or_else(|| StoreError::RoomNotFound {
                room_id: room_id.clone(),
            })
    }

    /// Start a new game: fresh epoch, seat 0 deals, empty action log.
    ///
    /// A stale `expected_game_id` makes this a no-op returning the unchanged
    /// room.
    pub async fn restart_game_session<R: GameRules>(
        &self,
        rules: &R,
        room_id: &RoomId,
        expected_game_id: Option<&GameId>,
    ) -> StoreResult<RoomSnapshot> {
        self.rotate_epoch(rules, room_id, expected_game_id, Rotation::Restart)
            .await
    }

    /// Start the next round: fresh epoch, the deal passes on from the prior
    /// dealer, seats reassigned by role precedence, empty action log.
    ///
    /// A stale `expected_game_id` makes this a no-op returning the unchanged
    /// room.
    pub async fn reset_round_session<R: GameRules>(
        &self,
        rules: &R,
        room_id: &RoomId,
        expected_game_id: Option<&GameId>,
    ) -> StoreResult<RoomSnapshot> {
        self.rotate_epoch(rules, room_id, expected_game_id, Rotation::NextRound)
            .await
    }

    async fn rotate_epoch<R: GameRules>(
        &self,
        rules: &R,
        room_id: &RoomId,
        expected_game_id: Option<&GameId>,
        rotation: Rotation,
    ) -> StoreResult<RoomSnapshot> {
        check_key(room_id.as_str())?;
        let snapshot = self
            .fetch_room_snapshot(room_id, true)
            .await?
            .ok_or_else(|| StoreError::RoomNotFound {
                room_id: room_id.clone(),
            })?;

        if let Some(expected) = expected_game_id {
            if expected != snapshot.game_id() {
                tracing::debug!(
                    room = %room_id,
                    expected = %expected,
                    current = %snapshot.game_id(),
                    "Stale epoch, not rotating"
                );
                return Ok(snapshot);
            }
        }

        let seats = seat_players(&snapshot.participants);
        let dealer_seat = match rotation {
            Rotation::Restart => 0,
            Rotation::NextRound => {
                let prior = cached_or_replayed(rules, &snapshot);
                next_dealer_seat(&rules.seats(&prior), rules.dealer_seat(&prior), &seats)
            }
        };

        let now = self.now();
        let mut meta = snapshot.meta;
        meta.current_game_id = GameId::generate();
        meta.dealer_seat = dealer_seat;
        meta.updated_at = now;
        meta.expires_at = now + self.settings.room_ttl_ms();
        let state = serde_json::to_value(rules.new_game(&seats, dealer_seat))?;

        let mut fields = Map::new();
        fields.insert("meta".into(), serde_json::to_value(&meta)?);
        fields.insert("gameState".into(), state.clone());
        fields.insert("actions".into(), Value::Null);
        self.backend.patch(&paths::room(room_id), fields).await?;

        tracing::info!(
            room = %room_id,
            epoch = %meta.current_game_id,
            dealer_seat,
            ?rotation,
            "Epoch rotated"
        );

        Ok(RoomSnapshot {
            meta,
            participants: snapshot.participants,
            actions: Vec::new(),
            game_state: Some(state),
            game_state_included: true,
        })
    }

    /// Remove a player. The last one out deletes the room and its directory
    /// entry; if the host leaves, the next participant in canonical order
    /// becomes host.
    pub async fn leave_room(&self, room_id: &RoomId, player_id: &ClientId) -> StoreResult<()> {
        check_key(room_id.as_str())?;
        check_key(player_id.as_str())?;

        self.backend
            .delete(&paths::participant(room_id, player_id))
            .await?;
        let mut participants = self.read_participants(room_id).await?;

        if participants.is_empty() {
            self.backend.delete(&paths::room(room_id)).await?;
            self.backend
                .delete(&paths::directory_entry(room_id))
                .await?;
            tracing::info!(room = %room_id, "Last player left, room deleted");
            return Ok(());
        }

        let Some(mut meta) = self.read_meta(room_id).await? else {
            return Ok(());
        };

        if !participants.iter().any(|p| p.player_id == meta.host_id) {
            let next = canonical_order(&participants)
                .first()
                .map(|p| p.player_id.clone());
            if let Some(next) = next {
                let mut fields = Map::new();
                fields.insert("role".into(), serde_json::to_value(Role::Host)?);
                self.backend
                    .patch(&paths::participant(room_id, &next), fields)
                    .await?;
                for p in participants.iter_mut().filter(|p| p.player_id == next) {
                    p.role = Role::Host;
                }
                tracing::info!(room = %room_id, host = %next, "Host handed off");
                meta.host_id = next;
            }
        }

        let now = self.now();
        meta.status = status_for(&meta, participants.len());
        meta.updated_at = now;
        let mut fields = meta_touch_fields(&meta);
        fields.insert("hostId".into(), Value::String(meta.host_id.to_string()));
        self.backend.patch(&paths::meta(room_id), fields).await?;

        tracing::info!(room = %room_id, player = %player_id, "Player left");
        self.publish_directory(&meta, &participants).await;
        Ok(())
    }

    // =========================================================================
    // Action log
    // =========================================================================

    /// Append an action to the current epoch's log.
    ///
    /// Returns `None` without writing when `expected_game_id` is stale or the
    /// action id is already recorded in this epoch. The record is stamped with
    /// the store's clock.
    pub async fn append_action(
        &self,
        room_id: &RoomId,
        actor_id: &ClientId,
        action: &Action,
        expected_game_id: Option<&GameId>,
    ) -> StoreResult<Option<ActionRecord>> {
        check_key(room_id.as_str())?;
        check_key(action.id.as_str())?;

        let Some(mut meta) = self.read_meta(room_id).await? else {
            return Err(StoreError::RoomNotFound {
                room_id: room_id.clone(),
            });
        };
        if let Some(expected) = expected_game_id {
            if expected != &meta.current_game_id {
                tracing::debug!(room = %room_id, action = %action.id, "Dropping stale-epoch append");
                return Ok(None);
            }
        }

        let path = paths::action(room_id, &meta.current_game_id, &action.id);
        if self.backend.get(&path).await?.is_some() {
            tracing::trace!(room = %room_id, action = %action.id, "Action already recorded");
            return Ok(None);
        }

        let now = self.now();
        let record = ActionRecord {
            id: action.id.clone(),
            game_id: meta.current_game_id.clone(),
            action: action.clone(),
            actor_id: actor_id.clone(),
            created_at: now,
        };
        self.backend
            .put(&path, serde_json::to_value(&record)?)
            .await?;

        meta.updated_at = now;
        meta.expires_at = now + self.settings.room_ttl_ms();
        self.backend
            .patch(&paths::meta(room_id), meta_touch_fields(&meta))
            .await?;
        self.refresh_directory(room_id).await;

        Ok(Some(record))
    }

    /// Overwrite the cached full game state.
    ///
    /// With `expected_game_id` set, the write is skipped (returning `false`)
    /// unless it names the current epoch.
    pub async fn upsert_game_state<S: Serialize + ?Sized>(
        &self,
        room_id: &RoomId,
        state: &S,
        expected_game_id: Option<&GameId>,
    ) -> StoreResult<bool> {
        check_key(room_id.as_str())?;
        let Some(meta) = self.read_meta(room_id).await? else {
            return Err(StoreError::RoomNotFound {
                room_id: room_id.clone(),
            });
        };
        if let Some(expected) = expected_game_id {
            if expected != &meta.current_game_id {
                return Ok(false);
            }
        }
        self.backend
            .put(&paths::game_state(room_id), serde_json::to_value(state)?)
            .await?;
        Ok(true)
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Merge a heartbeat/ping/ack patch into a player's presence.
    ///
    /// Returns `false` (writing nothing) if the player is not in the room.
    pub async fn touch_presence(
        &self,
        room_id: &RoomId,
        player_id: &ClientId,
        patch: &PresencePatch,
    ) -> StoreResult<bool> {
        check_key(room_id.as_str())?;
        check_key(player_id.as_str())?;

        let path = paths::participant(room_id, player_id);
        if self.backend.get(&path).await?.is_none() {
            return Ok(false);
        }
        if !patch.is_empty() {
            self.backend.patch(&path, patch.to_fields()).await?;
        }
        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a room. `Ok(None)` if it has no metadata.
    pub async fn fetch_room_snapshot(
        &self,
        room_id: &RoomId,
        include_game_state: bool,
    ) -> StoreResult<Option<RoomSnapshot>> {
        check_key(room_id.as_str())?;
        let raw = self.backend.get(&paths::room(room_id)).await?;
        self.decode_room(room_id, raw, include_game_state).await
    }

    /// Stream a room's snapshots.
    ///
    /// Uses the backend's push subscription when it has one, otherwise polls
    /// every `poll_interval_ms` and skips polls identical to the last one.
    /// Backend errors are delivered on the stream and polling continues.
    pub fn subscribe_room_snapshot(
        &self,
        room_id: &RoomId,
        include_game_state: bool,
    ) -> SnapshotSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();
        let room_id = room_id.clone();

        let task = match self.backend.subscribe_value(&paths::room(&room_id)) {
            Some(mut values) => tokio::spawn(async move {
                while let Some(raw) = values.recv().await {
                    let update = store.decode_room(&room_id, raw, include_game_state).await;
                    if tx.send(update).is_err() {
                        break;
                    }
                }
            }),
            None => tokio::spawn(async move {
                tracing::debug!(room = %room_id, "No push support, polling room");
                let mut timer = tokio::time::interval(store.settings.poll_interval());
                let mut last: Option<Option<RoomSnapshot>> = None;
                loop {
                    timer.tick().await;
                    let update = store.fetch_room_snapshot(&room_id, include_game_state).await;
                    if let Ok(snapshot) = &update {
                        if last.as_ref() == Some(snapshot) {
                            continue;
                        }
                        last = Some(snapshot.clone());
                    }
                    if tx.send(update).is_err() {
                        break;
                    }
                }
            }),
        };

        Subscription::new(rx, task)
    }

    pub(crate) async fn read_meta(&self, room_id: &RoomId) -> StoreResult<Option<RoomMeta>> {
        match self.backend.get(&paths::meta(room_id)).await? {
            Some(raw) => self.parse_meta(room_id, raw).await.map(Some),
            None => Ok(None),
        }
    }

    pub(crate) async fn read_participants(&self, room_id: &RoomId) -> StoreResult<Vec<Presence>> {
        let raw = self.backend.get(&paths::participants(room_id)).await?;
        Ok(parse_participants(room_id, raw))
    }

    async fn read_actions(
        &self,
        room_id: &RoomId,
        game_id: &GameId,
    ) -> StoreResult<Vec<ActionRecord>> {
        let raw = self.backend.get(&paths::actions(room_id)).await?;
        Ok(parse_actions(room_id, game_id, raw))
    }

    async fn decode_room(
        &self,
        room_id: &RoomId,
        raw: Option<Value>,
        include_game_state: bool,
    ) -> StoreResult<Option<RoomSnapshot>> {
        let Some(Value::Object(mut room)) = raw else {
            return Ok(None);
        };
        let Some(raw_meta) = room.remove("meta") else {
            return Ok(None);
        };
        let meta = self.parse_meta(room_id, raw_meta).await?;
        let participants = parse_participants(room_id, room.remove("participants"));
        let actions = parse_actions(room_id, &meta.current_game_id, room.remove("actions"));
        let game_state = if include_game_state {
            room.remove("gameState")
        } else {
            None
        };

        Ok(Some(RoomSnapshot {
            meta,
            participants,
            actions,
            game_state,
            game_state_included: include_game_state,
        }))
    }

    /// Decode metadata, upgrading legacy records in place.
    async fn parse_meta(&self, room_id: &RoomId, raw: Value) -> StoreResult<RoomMeta> {
        let mut fields = match raw {
            Value::Object(fields) => fields,
            other => return Ok(serde_json::from_value(other)?),
        };
        let added = migrate_legacy_meta(
            room_id,
            &mut fields,
            self.now(),
            self.settings.room_ttl_ms(),
        );
        let meta: RoomMeta = serde_json::from_value(Value::Object(fields))?;

        if !added.is_empty() {
            let keys: Vec<&String> = added.keys().collect();
            tracing::info!(room = %room_id, ?keys, "Migrating legacy room metadata");
            if let Err(e) = self.backend.patch(&paths::meta(room_id), added).await {
                tracing::warn!(room = %room_id, "Legacy metadata write-back failed: {}", e);
            }
        }
        Ok(meta)
    }
}

/// Room status for a participant count.
fn status_for(meta: &RoomMeta, participant_count: usize) -> RoomStatus {
    if meta.is_full(participant_count) {
        RoomStatus::Playing
    } else {
        RoomStatus::Waiting
    }
}

/// The metadata fields every write refreshes.
fn meta_touch_fields(meta: &RoomMeta) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("updatedAt".into(), json!(meta.updated_at));
    fields.insert("expiresAt".into(), json!(meta.expires_at));
    fields.insert("status".into(), json!(meta.status));
    fields
}

/// Fill in fields older records were written without. Returns what was
/// added; empty for current records.
fn migrate_legacy_meta(
    room_id: &RoomId,
    fields: &mut Map<String, Value>,
    now: i64,
    room_ttl_ms: i64,
) -> Map<String, Value> {
    let mut added = Map::new();
    if !fields.contains_key("roomId") {
        added.insert("roomId".into(), json!(room_id));
    }
    if !fields.get("currentGameId").is_some_and(Value::is_string) {
        added.insert("currentGameId".into(), json!(GameId::generate()));
    }
    let created_at = fields.get("createdAt").and_then(Value::as_i64);
    if created_at.is_none() {
        added.insert("createdAt".into(), json!(now));
    }
    let updated_at = fields
        .get("updatedAt")
        .and_then(Value::as_i64)
        .or(created_at)
        .unwrap_or(now);
    if !fields.contains_key("updatedAt") {
        added.insert("updatedAt".into(), json!(updated_at));
    }
    if !fields.contains_key("expiresAt") {
        added.insert("expiresAt".into(), json!(updated_at + room_ttl_ms));
    }
    if !fields.contains_key("status") {
        added.insert("status".into(), json!(RoomStatus::Waiting));
    }
    for (key, value) in &added {
        fields.insert(key.clone(), value.clone());
    }
    added
}

/// Decode participants in canonical order, skipping malformed records.
fn parse_participants(room_id: &RoomId, raw: Option<Value>) -> Vec<Presence> {
    let Some(Value::Object(records)) = raw else {
        return Vec::new();
    };
    let mut participants = Vec::with_capacity(records.len());
    for (key, value) in records {
        match serde_json::from_value::<Presence>(value) {
            Ok(presence) => participants.push(presence),
            Err(e) => {
                tracing::warn!(room = %room_id, participant = %key, "Skipping malformed presence: {}", e)
            }
        }
    }
    canonical_order(&participants).into_iter().cloned().collect()
}

/// Decode the records of `game_id`, deduplicated and ordered by
/// `(created_at, id)`.
fn parse_actions(room_id: &RoomId, game_id: &GameId, raw: Option<Value>) -> Vec<ActionRecord> {
    let Some(Value::Object(records)) = raw else {
        return Vec::new();
    };
    let mut current = Vec::new();
    for (key, value) in records {
        match serde_json::from_value::<ActionRecord>(value) {
            Ok(record) if &record.game_id == game_id => current.push(record),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(room = %room_id, record = %key, "Skipping malformed action record: {}", e)
            }
        }
    }
    order_records(&current).into_iter().cloned().collect()
}

/// The state a round ended in: the cached snapshot when it decodes, else a
/// replay of the log.
fn cached_or_replayed<R: GameRules>(rules: &R, snapshot: &RoomSnapshot) -> R::State {
    snapshot
        .game_state
        .clone()
        .and_then(|raw| serde_json::from_value::<R::State>(raw).ok())
        .unwrap_or_else(|| hydrate_snapshot(rules, snapshot).state)
}
