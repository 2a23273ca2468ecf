//! Durable cache in a SQLite key/value table

use super::CachePort;
use crate::error::ConstructError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SCHEMA_VERSION: i32 = 1;

/// Cache persisted to a SQLite database.
///
/// Every read refreshes the entry's access time so `evict_older_than` only
/// drops entries nobody has asked for recently.
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl SqliteCache {
    /// Open or create the cache database at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Cache that lives only as long as this handle
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        // Cached data is disposable: an unknown layout is dropped, not migrated
        if version != 0 && version != SCHEMA_VERSION {
            tracing::warn!(found = version, expected = SCHEMA_VERSION, "resetting cache schema");
            conn.execute_batch("DROP TABLE IF EXISTS kv;")?;
        }

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                accessed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_kv_accessed ON kv(accessed_at);
            ",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Run a blocking closure against the connection off the async executor
    async fn run<T, F>(&self, f: F) -> crate::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> crate::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| ConstructError::Cache(format!("cache connection poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| ConstructError::Cache(format!("cache task failed: {e}")))?
    }

    /// Delete entries not read or written within `max_age`.
    ///
    /// Returns the number of entries removed.
    pub async fn evict_older_than(&self, max_age: Duration) -> crate::Result<usize> {
        let cutoff = now_secs() - max_age.as_secs() as i64;
        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM kv WHERE accessed_at < ?1", params![cutoff])?;
            Ok(removed)
        })
        .await
    }

    /// Number of stored entries
    pub async fn len(&self) -> crate::Result<usize> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl CachePort for SqliteCache {
    async fn get(&self, key: &str) -> crate::Result<Option<Value>> {
        let key = key.to_string();
        self.run(move |conn| {
            let text: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()?;
            let Some(text) = text else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE kv SET accessed_at = ?1 WHERE key = ?2",
                params![now_secs(), key],
            )?;
            match serde_json::from_str(&text) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "discarding corrupt cache entry");
                    Ok(None)
                }
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: Value) -> crate::Result<()> {
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value, accessed_at) VALUES (?1, ?2, ?3)",
                params![key, text, now_secs()],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> crate::Result<()> {
        self.run(|conn| {
            conn.execute("DELETE FROM kv", [])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persists_across_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let cache = SqliteCache::open(&path).unwrap();
        cache.set("tree:acme/parts:main", json!({"sha": "t1", "tree": []})).await.unwrap();
        drop(cache);

        let cache = SqliteCache::open(&path).unwrap();
        let value = cache.get("tree:acme/parts:main").await.unwrap();
        assert_eq!(value, Some(json!({"sha": "t1", "tree": []})));
    }

    #[tokio::test]
    async fn test_overwrite_and_clear() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache.set("k", json!(1)).await.unwrap();
        cache.set("k", json!(2)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.len().await.unwrap(), 1);

        cache.clear().await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_a_miss() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .run(|conn| {
                conn.execute(
                    "INSERT INTO kv (key, value, accessed_at) VALUES ('k', '{oops', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_keeps_recent_entries() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache.set("fresh", json!(1)).await.unwrap();
        cache
            .run(|conn| {
                conn.execute(
                    "INSERT INTO kv (key, value, accessed_at) VALUES ('stale', '1', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let removed = cache
            .evict_older_than(Duration::from_secs(30 * 86400))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("fresh").await.unwrap().is_some());
        assert!(cache.get("stale").await.unwrap().is_none());
    }
}
