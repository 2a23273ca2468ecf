//! Cache port: async key/value storage for tree, metadata and blob snapshots

mod memory;
mod sqlite;

pub use memory::InMemoryCache;
pub use sqlite::SqliteCache;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Key/value store supplied by the environment.
///
/// Implementations must tolerate concurrent access on disjoint keys. A stored
/// value that can no longer be decoded is reported as absent.
#[async_trait]
pub trait CachePort: Send + Sync {
    async fn get(&self, key: &str) -> crate::Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> crate::Result<()>;

    async fn clear(&self) -> crate::Result<()>;

    /// `get` with a fallback for missing keys
    async fn get_or(&self, key: &str, default: Value) -> crate::Result<Value> {
        Ok(self.get(key).await?.unwrap_or(default))
    }
}

pub type SharedCache = Arc<dyn CachePort>;

/// Key of the raw listing snapshot for one repository branch
pub fn tree_key(repo: &str, branch: &str) -> String {
    format!("tree:{}:{}", repo, branch)
}

/// Key of a metadata snapshot for a set of contributing tree hashes.
///
/// Hashes are sorted so the key does not depend on merge order.
pub fn meta_key(tree_shas: &[String]) -> String {
    let mut shas: Vec<&str> = tree_shas.iter().map(String::as_str).collect();
    shas.sort_unstable();
    format!("meta:{}", shas.join(":"))
}

/// Key of a downloaded blob body
pub fn blob_key(url: &str) -> String {
    format!("blob:{}", url)
}

/// Typed read; an entry that does not decode as `T` is treated as a miss
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CachePort,
    key: &str,
) -> crate::Result<Option<T>> {
    let Some(value) = cache.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring unreadable cache entry");
            Ok(None)
        }
    }
}

/// Typed write
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CachePort,
    key: &str,
    value: &T,
) -> crate::Result<()> {
    cache.set(key, serde_json::to_value(value)?).await
}
