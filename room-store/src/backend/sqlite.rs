//! SQLite backend.
//!
//! The tree is stored flattened: one row per leaf, keyed by its full path.
//! Objects never get a row of their own, so reading a subtree is a prefix
//! scan and deleting one is a prefix delete. Arrays are stored whole.
//!
//! No push support: the room store polls this backend.

use super::tree::{get_at, join, normalize, segments, set_at};
use super::{ChildStream, KvBackend, ValueStream};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed JSON tree.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (or create) a database file.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("rooms.db"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // A second connection would see a different in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                path TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of leaf rows (for tests and diagnostics).
    pub async fn leaf_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

fn subtree_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

/// Flatten a value into `(path, json)` leaf rows.
fn flatten(path: &str, value: Value, out: &mut Vec<(String, String)>) -> Result<(), StoreError> {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&join(path, &key), child, out)?;
            }
        }
        leaf => out.push((path.to_string(), serde_json::to_string(&leaf)?)),
    }
    Ok(())
}

/// Remove the subtree at `path` and any leaf sitting on one of its ancestors.
async fn clear(tx: &mut Transaction<'_, Sqlite>, path: &str) -> Result<(), StoreError> {
    let prefix = subtree_prefix(path);
    sqlx::query("DELETE FROM kv WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2")
        .bind(path)
        .bind(&prefix)
        .execute(&mut **tx)
        .await?;

    let segs = segments(path);
    for depth in 1..segs.len() {
        sqlx::query("DELETE FROM kv WHERE path = ?1")
            .bind(segs[..depth].join("/"))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn write(
    tx: &mut Transaction<'_, Sqlite>,
    path: &str,
    value: Value,
) -> Result<(), StoreError> {
    clear(tx, path).await?;
    let Some(value) = normalize(value) else {
        return Ok(());
    };
    let mut rows = Vec::new();
    flatten(path, value, &mut rows)?;
    for (leaf, json) in rows {
        sqlx::query("INSERT INTO kv (path, value) VALUES (?1, ?2)")
            .bind(leaf)
            .bind(json)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let path = segments(path).join("/");
        let prefix = subtree_prefix(&path);
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT path, value FROM kv WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        )
        .bind(&path)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        let mut root = Value::Null;
        for (leaf, json) in rows {
            let value: Value = serde_json::from_str(&json)?;
            let rel = leaf.strip_prefix(&prefix).unwrap_or("");
            set_at(&mut root, &segments(rel), Some(value));
        }
        Ok(get_at::<&str>(&root, &[]).cloned())
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let path = segments(path).join("/");
        let mut tx = self.pool.begin().await?;
        write(&mut tx, &path, value).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn patch(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let path = segments(path).join("/");
        let mut tx = self.pool.begin().await?;
        for (key, value) in fields {
            write(&mut tx, &join(&path, &key), value).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let path = segments(path).join("/");
        let mut tx = self.pool.begin().await?;
        clear(&mut tx, &path).await?;
        tx.commit().await?;
        Ok(())
    }

    fn subscribe_value(&self, _path: &str) -> Option<ValueStream> {
        None
    }

    fn subscribe_child(&self, _path: &str) -> Option<ChildStream> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_and_read_back_tree() {
        let db = SqliteBackend::in_memory().await.unwrap();
        db.put(
            "rooms/r1",
            json!({"meta": {"hostId": "h", "expectedPlayers": 2}, "gameState": {"log": ["a"]}}),
        )
        .await
        .unwrap();

        let room = db.get("rooms/r1").await.unwrap().unwrap();
        assert_eq!(room["meta"]["hostId"], "h");
        assert_eq!(room["gameState"]["log"], json!(["a"]));
        assert_eq!(db.get("rooms/r1/meta/hostId").await.unwrap(), Some(json!("h")));
        assert_eq!(db.get("rooms/r2").await.unwrap(), None);
        assert_eq!(db.leaf_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn put_replaces_whole_subtree() {
        let db = SqliteBackend::in_memory().await.unwrap();
        db.put("a", json!({"x": 1, "y": 2})).await.unwrap();
        db.put("a", json!({"z": 3})).await.unwrap();
        assert_eq!(db.get("a").await.unwrap(), Some(json!({"z": 3})));
    }

    #[tokio::test]
    async fn writing_below_a_leaf_replaces_it() {
        let db = SqliteBackend::in_memory().await.unwrap();
        db.put("a", json!(1)).await.unwrap();
        db.put("a/b", json!(2)).await.unwrap();
        assert_eq!(db.get("a").await.unwrap(), Some(json!({"b": 2})));
    }

    #[tokio::test]
    async fn patch_merges_and_deletes() {
        let db = SqliteBackend::in_memory().await.unwrap();
        db.put("p", json!({"joinedAt": 1, "lastSeenAt": 1, "pingToken": "t"}))
            .await
            .unwrap();
        let mut fields = Map::new();
        fields.insert("lastSeenAt".into(), json!(5));
        fields.insert("pingToken".into(), Value::Null);
        db.patch("p", fields).await.unwrap();
        assert_eq!(
            db.get("p").await.unwrap(),
            Some(json!({"joinedAt": 1, "lastSeenAt": 5}))
        );
    }

    #[tokio::test]
    async fn sibling_prefixes_are_not_confused() {
        let db = SqliteBackend::in_memory().await.unwrap();
        db.put("rooms/r1/meta", json!(1)).await.unwrap();
        db.put("rooms/r10/meta", json!(2)).await.unwrap();
        db.delete("rooms/r1").await.unwrap();
        assert_eq!(db.get("rooms").await.unwrap(), Some(json!({"r10": {"meta": 2}})));
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");
        {
            let db = SqliteBackend::new(&path).await.unwrap();
            db.put("directory/r1", json!({"roomId": "r1"})).await.unwrap();
        }
        let db = SqliteBackend::new(&path).await.unwrap();
        assert_eq!(
            db.get("directory").await.unwrap(),
            Some(json!({"r1": {"roomId": "r1"}}))
        );
    }

    #[tokio::test]
    async fn no_push_support() {
        let db = SqliteBackend::in_memory().await.unwrap();
        assert!(db.subscribe_value("rooms").is_none());
        assert!(db.subscribe_child("directory").is_none());
    }
}
