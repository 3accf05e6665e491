//! Room directory: the only globally discoverable state.
//!
//! Entries are refreshed on every room write with a fresh TTL. Listings skip
//! expired and undiscoverable (full) rooms; the sweep deletes expired
//! entries, and the room behind one if the room itself has expired.

use crate::backend::{ChildEvent, KvBackend};
use crate::error::StoreResult;
use crate::paths;
use crate::store::RoomStore;
use crate::subscription::{DirectorySubscription, Subscription};
use room_types::{DirectoryEntry, Presence, RoomId, RoomMeta, RoomStatus};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

impl<B: KvBackend> RoomStore<B> {
    /// List joinable rooms, newest first.
    ///
    /// `limit` defaults to the configured `directory_limit`.
    pub async fn fetch_room_directory(&self, limit: Option<usize>) -> StoreResult<Vec<DirectoryEntry>> {
        let raw = self.backend.get(paths::DIRECTORY).await?;
        let limit = limit.unwrap_or(self.settings.directory_limit);
        let records = match raw {
            Some(Value::Object(records)) => records,
            _ => Map::new(),
        };
        Ok(listing(records.values(), self.now(), limit))
    }

    /// Stream the directory listing.
    ///
    /// Push-capable backends feed child events into a local copy of the
    /// directory; otherwise the listing is polled. Unchanged listings are not
    /// re-sent.
    pub fn subscribe_room_directory(&self, limit: Option<usize>) -> DirectorySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();
        let limit = limit.unwrap_or(self.settings.directory_limit);

        let task = match self.backend.subscribe_child(paths::DIRECTORY) {
            Some(mut events) => tokio::spawn(async move {
                let mut entries: BTreeMap<String, Value> = BTreeMap::new();
                let mut last: Option<Vec<DirectoryEntry>> = None;
                loop {
                    // Coalesce whatever is already queued into one listing.
                    while let Ok(event) = events.try_recv() {
                        apply_event(&mut entries, event);
                    }
                    let current = listing(entries.values(), store.now(), limit);
                    if last.as_ref() != Some(&current) {
                        last = Some(current.clone());
                        if tx.send(Ok(current)).is_err() {
                            break;
                        }
                    }
                    match events.recv().await {
                        Some(event) => apply_event(&mut entries, event),
                        None => break,
                    }
                }
            }),
            None => tokio::spawn(async move {
                tracing::debug!("No push support, polling directory");
                let mut timer = tokio::time::interval(store.settings.poll_interval());
                let mut last: Option<Vec<DirectoryEntry>> = None;
                loop {
                    timer.tick().await;
                    let update = store.fetch_room_directory(Some(limit)).await;
                    if let Ok(current) = &update {
                        if last.as_ref() == Some(current) {
                            continue;
                        }
                        last = Some(current.clone());
                    }
                    if tx.send(update).is_err() {
                        break;
                    }
                }
            }),
        };

        Subscription::new(rx, task)
    }

    /// Delete expired directory entries, plus the rooms behind them whose own
    /// TTL has passed. Returns the number of entries removed.
    pub async fn sweep_directory(&self) -> StoreResult<usize> {
        let now = self.now();
        let Some(Value::Object(records)) = self.backend.get(paths::DIRECTORY).await? else {
            return Ok(0);
        };

        let mut removed = 0;
        for (key, value) in records {
            let expired = match serde_json::from_value::<DirectoryEntry>(value) {
                Ok(entry) => entry.is_expired(now),
                Err(e) => {
                    tracing::warn!(entry = %key, "Removing malformed directory entry: {}", e);
                    true
                }
            };
            if !expired {
                continue;
            }

            let room_id = RoomId::new(key);
            self.backend.delete(&paths::directory_entry(&room_id)).await?;
            removed += 1;

            match self.read_meta(&room_id).await {
                Ok(Some(meta)) if meta.expires_at <= now => {
                    self.backend.delete(&paths::room(&room_id)).await?;
                    tracing::info!(room = %room_id, "Swept expired room");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(room = %room_id, "Could not read room during sweep: {}", e),
            }
        }
        Ok(removed)
    }

    /// Write the directory entry for a room. Failures are logged, not
    /// returned: discovery is advisory.
    pub(crate) async fn publish_directory(&self, meta: &RoomMeta, participants: &[Presence]) {
        let now = self.now();
        let host_name = participants
            .iter()
            .find(|p| p.player_id == meta.host_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let full = meta.is_full(participants.len());
        let entry = DirectoryEntry {
            room_id: meta.room_id.clone(),
            host_id: meta.host_id.clone(),
            host_name,
            expected_players: meta.expected_players,
            participant_count: participants.len() as u32,
            status: if full {
                RoomStatus::Playing
            } else {
                RoomStatus::Waiting
            },
            discoverable: !full,
            created_at: meta.created_at,
            updated_at: now,
            expires_at: now + self.settings.directory_ttl_ms(),
        };

        let result = match serde_json::to_value(&entry) {
            Ok(value) => self
                .backend
                .put(&paths::directory_entry(&meta.room_id), value)
                .await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(room = %meta.room_id, "Directory publish failed: {}", e);
        }
    }

    /// Extend an existing entry's TTL without recounting participants.
    pub(crate) async fn refresh_directory(&self, room_id: &RoomId) {
        let path = paths::directory_entry(room_id);
        let now = self.now();
        let result = match self.backend.get(&path).await {
            Ok(Some(_)) => {
                let mut fields = Map::new();
                fields.insert("updatedAt".into(), now.into());
                fields.insert(
                    "expiresAt".into(),
                    (now + self.settings.directory_ttl_ms()).into(),
                );
                self.backend.patch(&path, fields).await
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(room = %room_id, "Directory refresh failed: {}", e);
        }
    }
}

fn apply_event(entries: &mut BTreeMap<String, Value>, event: ChildEvent) {
    match event {
        ChildEvent::Added { key, value } | ChildEvent::Changed { key, value } => {
            entries.insert(key, value);
        }
        ChildEvent::Removed { key } => {
            entries.remove(&key);
        }
    }
}

/// Live, discoverable entries: newest first, ties by room id, capped.
fn listing<'a>(records: impl Iterator<Item = &'a Value>, now: i64, limit: usize) -> Vec<DirectoryEntry> {
    let mut entries: Vec<DirectoryEntry> = records
        .filter_map(|v| serde_json::from_value::<DirectoryEntry>(v.clone()).ok())
        .filter(|e| e.discoverable && !e.is_expired(now))
        .collect();
    entries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.room_id.cmp(&b.room_id))
    });
    entries.truncate(limit);
    entries
}
