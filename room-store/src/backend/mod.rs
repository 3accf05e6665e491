//! Keyed store backends.
//!
//! The room store only needs a JSON tree addressed by slash-separated paths
//! with `get/put/patch/delete`, plus optional push subscriptions. Any keyed
//! store fits; backends without push return `None` from the subscribe calls
//! and the room store polls them instead.
//!
//! Tree semantics shared by every backend:
//! - `null` values and empty objects do not exist;
//! - a `null` field in a patch deletes that child;
//! - reading a path returns the whole subtree below it.

mod memory;
mod sqlite;
pub(crate) mod tree;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// A change to one direct child of a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    /// A child appeared.
    Added {
        /// Child key.
        key: String,
        /// Child value.
        value: Value,
    },
    /// A child's value changed.
    Changed {
        /// Child key.
        key: String,
        /// New value.
        value: Value,
    },
    /// A child was removed.
    Removed {
        /// Child key.
        key: String,
    },
}

/// Stream of values at a path; `None` means the path is empty.
pub type ValueStream = mpsc::UnboundedReceiver<Option<Value>>;

/// Stream of child changes below a path.
pub type ChildStream = mpsc::UnboundedReceiver<ChildEvent>;

/// Trait for keyed JSON tree backends.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Read the subtree at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the subtree at `path`.
    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path` (`null` deletes a field).
    async fn patch(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Remove the subtree at `path`.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Watch the value at `path`. Emits the current value first.
    ///
    /// Returns `None` when the backend has no push support.
    fn subscribe_value(&self, path: &str) -> Option<ValueStream>;

    /// Watch the direct children of `path`. Emits `Added` for existing
    /// children first.
    ///
    /// Returns `None` when the backend has no push support.
    fn subscribe_child(&self, path: &str) -> Option<ChildStream>;
}
