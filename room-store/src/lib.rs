//! # room-store
//!
//! Replicated room store for cardroom.
//!
//! Each room is a small JSON tree in a passive keyed store:
//! - `meta`: host, capacity, status and the epoch token (`currentGameId`)
//! - `participants`: one presence record per player
//! - `actions`: the append-only action log, keyed by `{epoch}:{actionId}`
//! - `gameState`: a cached full snapshot for late joiners
//!
//! A separate `directory` lists joinable rooms with a TTL.
//!
//! ## Concurrency
//!
//! The backend has no compare-and-swap. Guarded writes compare the caller's
//! epoch with the stored one and become no-ops when it is stale. Appends are
//! idempotent because the record key contains the action id.
//!
//! ## Backends
//!
//! Anything implementing [`KvBackend`]:
//! - [`MemoryBackend`]: in-process, push subscriptions, failure injection
//! - [`SqliteBackend`]: durable, polled

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cleanup;
pub mod config;
mod directory;
pub mod error;
mod paths;
pub mod store;
pub mod subscription;

pub use backend::{ChildEvent, KvBackend, MemoryBackend, SqliteBackend};
pub use cleanup::spawn_sweep_task;
pub use config::{CleanupConfig, Config, ConfigError, DatabaseConfig, StoreSettings};
pub use error::{StoreError, StoreResult};
pub use store::{PlayerProfile, RoomStore, MAX_PLAYERS, MIN_PLAYERS};
pub use subscription::{DirectorySubscription, SnapshotSubscription, Subscription};
