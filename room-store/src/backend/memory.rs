//! In-memory backend with push subscriptions.
//!
//! Holds the whole tree in one JSON value. Watchers are notified
//! synchronously after every write that touches their path, so a test that
//! awaits a write can immediately observe the resulting event.
//!
//! Also used for testing: writes and reads can be forced to fail, and the
//! push support can be switched off to exercise polling.

use super::tree::{self, children, get_at, overlaps, segments, set_at};
use super::{ChildEvent, ChildStream, KvBackend, ValueStream};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// In-memory backend. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug)]
struct MemoryInner {
    root: Value,
    push: bool,
    watchers: Vec<Watcher>,
    fail_next_read: Option<String>,
    fail_next_write: Option<String>,
    fail_under: Option<(Vec<String>, String)>,
    writes: u64,
}

#[derive(Debug)]
enum Watcher {
    Value {
        path: Vec<String>,
        last: Option<Value>,
        tx: mpsc::UnboundedSender<Option<Value>>,
    },
    Child {
        path: Vec<String>,
        last: Map<String, Value>,
        tx: mpsc::UnboundedSender<ChildEvent>,
    },
}

impl Watcher {
    fn is_closed(&self) -> bool {
        match self {
            Self::Value { tx, .. } => tx.is_closed(),
            Self::Child { tx, .. } => tx.is_closed(),
        }
    }

    /// Re-read the watched path and emit whatever changed.
    fn notify(&mut self, root: &Value) {
        match self {
            Self::Value { path, last, tx } => {
                let current = get_at(root, path.as_slice()).cloned();
                if current != *last {
                    *last = current.clone();
                    let _ = tx.send(current);
                }
            }
            Self::Child { path, last, tx } => {
                let current = children(get_at(root, path.as_slice()));
                for (key, value) in &current {
                    match last.get(key) {
                        None => {
                            let _ = tx.send(ChildEvent::Added {
                                key: key.clone(),
                                value: value.clone(),
                            });
                        }
                        Some(prev) if prev != value => {
                            let _ = tx.send(ChildEvent::Changed {
                                key: key.clone(),
                                value: value.clone(),
                            });
                        }
                        Some(_) => {}
                    }
                }
                for key in last.keys().filter(|k| !current.contains_key(*k)) {
                    let _ = tx.send(ChildEvent::Removed { key: key.clone() });
                }
                *last = current;
            }
        }
    }

    fn path(&self) -> &[String] {
        match self {
            Self::Value { path, .. } | Self::Child { path, .. } => path,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty, push-capable backend.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                root: Value::Null,
                push: true,
                watchers: Vec::new(),
                fail_next_read: None,
                fail_next_write: None,
                fail_under: None,
                writes: 0,
            })),
        }
    }

    /// Create an empty backend that reports no push support.
    pub fn without_push() -> Self {
        let backend = Self::new();
        backend.lock().push = false;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next read to fail with the given error.
    pub fn fail_next_read(&self, error: &str) {
        self.lock().fail_next_read = Some(error.to_string());
    }

    /// Cause the next write to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        self.lock().fail_next_write = Some(error.to_string());
    }

    /// Cause the next write at or below `path` to fail.
    pub fn fail_next_write_under(&self, path: &str, error: &str) {
        let path = segments(path).into_iter().map(String::from).collect();
        self.lock().fail_under = Some((path, error.to_string()));
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// A copy of the whole tree.
    pub fn dump(&self) -> Value {
        self.lock().root.clone()
    }

    fn write(&self, path: &str, apply: impl FnOnce(&mut Value)) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_write.take() {
            return Err(StoreError::Backend(error));
        }
        let segs = segments(path);
        let targeted = inner
            .fail_under
            .as_ref()
            .is_some_and(|(prefix, _)| prefix.len() <= segs.len() && overlaps(prefix, &segs));
        if targeted {
            if let Some((_, error)) = inner.fail_under.take() {
                return Err(StoreError::Backend(error));
            }
        }
        apply(&mut inner.root);
        inner.writes += 1;

        let MemoryInner { root, watchers, .. } = &mut *inner;
        watchers.retain(|w| !w.is_closed());
        for watcher in watchers.iter_mut().filter(|w| overlaps(w.path(), &segs)) {
            watcher.notify(root);
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_read.take() {
            return Err(StoreError::Backend(error));
        }
        Ok(get_at(&inner.root, segments(path).as_slice()).cloned())
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.write(path, |root| set_at(root, &segments(path), Some(value)))
    }

    async fn patch(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.write(path, |root| {
            for (key, value) in fields {
                let child = tree::join(path, &key);
                set_at(root, &segments(&child), Some(value));
            }
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.write(path, |root| set_at(root, &segments(path), None))
    }

    fn subscribe_value(&self, path: &str) -> Option<ValueStream> {
        let mut inner = self.lock();
        if !inner.push {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let path: Vec<String> = segments(path).into_iter().map(String::from).collect();
        let current = get_at(&inner.root, path.as_slice()).cloned();
        let _ = tx.send(current.clone());
        inner.watchers.push(Watcher::Value {
            path,
            last: current,
            tx,
        });
        Some(rx)
    }

    fn subscribe_child(&self, path: &str) -> Option<ChildStream> {
        let mut inner = self.lock();
        if !inner.push {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let path: Vec<String> = segments(path).into_iter().map(String::from).collect();
        let mut watcher = Watcher::Child {
            path,
            last: Map::new(),
            tx,
        };
        watcher.notify(&inner.root);
        inner.watchers.push(watcher);
        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ===========================================
    // Tree operations
    // ===========================================

    #[tokio::test]
    async fn put_then_get_subtree() {
        let backend = MemoryBackend::new();
        backend.put("rooms/r1/meta", json!({"x": 1})).await.unwrap();
        backend.put("rooms/r1/participants/p1", json!({"n": "a"})).await.unwrap();

        let room = backend.get("rooms/r1").await.unwrap().unwrap();
        assert_eq!(room["meta"]["x"], 1);
        assert_eq!(room["participants"]["p1"]["n"], "a");
        assert_eq!(backend.get("rooms/r2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn patch_merges_and_null_deletes() {
        let backend = MemoryBackend::new();
        backend
            .put("p", json!({"joinedAt": 1, "lastSeenAt": 1, "old": true}))
            .await
            .unwrap();
        let mut fields = Map::new();
        fields.insert("lastSeenAt".into(), json!(9));
        fields.insert("old".into(), Value::Null);
        backend.patch("p", fields).await.unwrap();

        assert_eq!(
            backend.get("p").await.unwrap(),
            Some(json!({"joinedAt": 1, "lastSeenAt": 9}))
        );
    }

    #[tokio::test]
    async fn delete_removes_subtree() {
        let backend = MemoryBackend::new();
        backend.put("rooms/r1/meta", json!(1)).await.unwrap();
        backend.delete("rooms/r1").await.unwrap();
        assert_eq!(backend.get("rooms").await.unwrap(), None);
    }

    // ===========================================
    // Failure injection
    // ===========================================

    #[tokio::test]
    async fn forced_write_failure_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next_write("offline");
        let err = backend.put("a", json!(1)).await.unwrap_err();
        assert!(err.is_retryable());
        backend.put("a", json!(1)).await.unwrap();
        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test]
    async fn targeted_write_failure_skips_other_paths() {
        let backend = MemoryBackend::new();
        backend.fail_next_write_under("directory", "offline");
        backend.put("rooms/r1", json!(1)).await.unwrap();
        assert!(backend.put("directory/r1", json!(1)).await.is_err());
        backend.put("directory/r1", json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn forced_read_failure() {
        let backend = MemoryBackend::new();
        backend.fail_next_read("offline");
        assert!(backend.get("a").await.is_err());
        assert!(backend.get("a").await.is_ok());
    }

    // ===========================================
    // Subscriptions
    // ===========================================

    #[tokio::test]
    async fn value_subscription_emits_initial_and_changes() {
        let backend = MemoryBackend::new();
        let mut values = backend.subscribe_value("rooms/r1").unwrap();
        assert_eq!(values.recv().await.unwrap(), None);

        backend.put("rooms/r1/meta", json!(1)).await.unwrap();
        assert_eq!(values.recv().await.unwrap(), Some(json!({"meta": 1})));

        // Unrelated write: nothing emitted.
        backend.put("rooms/r2/meta", json!(2)).await.unwrap();
        // Identical rewrite: nothing emitted.
        backend.put("rooms/r1/meta", json!(1)).await.unwrap();
        backend.delete("rooms/r1").await.unwrap();
        assert_eq!(values.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn child_subscription_reports_add_change_remove() {
        let backend = MemoryBackend::new();
        backend.put("directory/a", json!(1)).await.unwrap();
        let mut events = backend.subscribe_child("directory").unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ChildEvent::Added {
                key: "a".into(),
                value: json!(1)
            }
        );

        backend.put("directory/b", json!(2)).await.unwrap();
        backend.put("directory/a", json!(3)).await.unwrap();
        backend.delete("directory/b").await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), ChildEvent::Added { key, .. } if key == "b"));
        assert!(matches!(events.recv().await.unwrap(), ChildEvent::Changed { key, .. } if key == "a"));
        assert_eq!(
            events.recv().await.unwrap(),
            ChildEvent::Removed { key: "b".into() }
        );
    }

    #[tokio::test]
    async fn polling_only_backend_refuses_subscriptions() {
        let backend = MemoryBackend::without_push();
        assert!(backend.subscribe_value("x").is_none());
        assert!(backend.subscribe_child("x").is_none());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let backend = MemoryBackend::new();
        let values = backend.subscribe_value("a").unwrap();
        drop(values);
        backend.put("a", json!(1)).await.unwrap();
        assert!(backend.lock().watchers.is_empty());
    }
}
