//! Read-through snapshots of remote trees and blobs

use crate::cache::{blob_key, get_json, set_json, tree_key, CachePort, SharedCache};
use crate::error::ConstructError;
use crate::remote::{resolve_branch, Blob, RepositoryApi, ResolvedBranch, SharedApi, TreeEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw listing of one tree hash as stored under `tree:<repo>:<branch>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub sha: String,
    pub tree: Vec<TreeEntry>,
}

/// Remote API paired with the cache it reads through
#[derive(Clone)]
pub struct SnapshotStore {
    api: SharedApi,
    cache: SharedCache,
}

impl SnapshotStore {
    pub fn new(api: SharedApi, cache: SharedCache) -> Self {
        Self { api, cache }
    }

    pub fn api(&self) -> &dyn RepositoryApi {
        self.api.as_ref()
    }

    pub fn cache(&self) -> &dyn CachePort {
        self.cache.as_ref()
    }

    /// Listing for the head of `branch` (default branch when `None`).
    ///
    /// The cached snapshot is returned only when its hash equals the current
    /// head tree hash; otherwise the listing is fetched and the entry replaced.
    /// `Ok(None)` means the repository has no commits.
    pub async fn get_tree(
        &self,
        full_name: &str,
        branch: Option<&str>,
    ) -> crate::Result<Option<(ResolvedBranch, TreeSnapshot)>> {
        let Some(resolved) = resolve_branch(self.api(), full_name, branch).await? else {
            return Ok(None);
        };

        let key = tree_key(full_name, &resolved.name);
        if let Some(cached) = get_json::<TreeSnapshot>(self.cache(), &key).await? {
            if cached.sha == resolved.head_tree_sha {
                tracing::debug!(repo = full_name, branch = %resolved.name, "tree cache hit");
                return Ok(Some((resolved, cached)));
            }
        }

        tracing::debug!(
            repo = full_name,
            branch = %resolved.name,
            sha = %resolved.head_tree_sha,
            "tree cache miss"
        );
        let tree = self.api.tree(full_name, &resolved.head_tree_sha).await?;
        let snapshot = TreeSnapshot {
            sha: resolved.head_tree_sha.clone(),
            tree: tree.tree,
        };
        set_json(self.cache(), &key, &snapshot).await?;
        Ok(Some((resolved, snapshot)))
    }

    /// Blob body, cached under `blob:<url>`.
    ///
    /// Blob URLs name content hashes, so a cached body never goes stale.
    pub async fn download_blob(&self, url: &str) -> crate::Result<Blob> {
        let key = blob_key(url);
        if let Some(blob) = get_json::<Blob>(self.cache(), &key).await? {
            return Ok(blob);
        }
        let blob = self.api.blob(url).await?;
        set_json(self.cache(), &key, &blob).await?;
        Ok(blob)
    }

    /// Blob parsed as JSON; decode or parse failures are `MalformedSideCar`
    pub async fn download_json(&self, url: &str) -> crate::Result<Value> {
        let blob = self.download_blob(url).await?;
        let bytes = blob.decode().map_err(|e| ConstructError::MalformedSideCar {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ConstructError::MalformedSideCar {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Raw blob bytes, uncached
    pub async fn download_raw(&self, url: &str) -> crate::Result<Vec<u8>> {
        self.api.raw_blob(url).await
    }

    /// Blob as a `data:` URI for inline display
    pub async fn data_uri(&self, url: &str, mime: &str) -> crate::Result<String> {
        let blob = self.download_blob(url).await?;
        Ok(format!("data:{};base64,{}", mime, blob.base64_content()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::remote::InMemoryRemote;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryRemote>, Arc<InMemoryCache>, SnapshotStore) {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = Arc::new(InMemoryCache::new());
        let store = SnapshotStore::new(remote.clone(), cache.clone());
        (remote, cache, store)
    }

    #[tokio::test]
    async fn test_unchanged_head_fetches_once() {
        let (remote, _cache, store) = setup();
        remote.add_repository("acme/parts", "main");
        remote.commit("acme/parts", "main", "t1", &[("part.step", "x")]);

        let (_, first) = store.get_tree("acme/parts", None).await.unwrap().unwrap();
        let (_, second) = store.get_tree("acme/parts", None).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.tree_fetches(), 1);
    }

    #[tokio::test]
    async fn test_moved_head_refetches_and_updates_entry() {
        let (remote, cache, store) = setup();
        remote.add_repository("acme/parts", "main");
        remote.commit("acme/parts", "main", "t1", &[("part.step", "x")]);
        store.get_tree("acme/parts", Some("main")).await.unwrap();

        remote.commit("acme/parts", "main", "t2", &[("part.step", "y")]);
        let (branch, snapshot) = store.get_tree("acme/parts", Some("main")).await.unwrap().unwrap();
        assert_eq!(branch.head_tree_sha, "t2");
        assert_eq!(snapshot.sha, "t2");
        assert_eq!(remote.tree_fetches(), 2);

        let stored: TreeSnapshot = get_json(cache.as_ref(), "tree:acme/parts:main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sha, "t2");

        store.get_tree("acme/parts", Some("main")).await.unwrap();
        assert_eq!(remote.tree_fetches(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_tree_entry_refetches() {
        let (remote, cache, store) = setup();
        remote.add_repository("acme/parts", "main");
        remote.commit("acme/parts", "main", "t1", &[("part.step", "x")]);
        cache.insert_raw("tree:acme/parts:main", "garbage");

        let (_, snapshot) = store.get_tree("acme/parts", None).await.unwrap().unwrap();
        assert_eq!(snapshot.sha, "t1");
        assert_eq!(remote.tree_fetches(), 1);
    }

    #[tokio::test]
    async fn test_empty_repository_has_no_tree() {
        let (remote, _cache, store) = setup();
        remote.add_repository("acme/empty", "main");
        assert!(store.get_tree("acme/empty", None).await.unwrap().is_none());
        assert_eq!(remote.tree_fetches(), 0);
    }

    #[tokio::test]
    async fn test_download_json_cached_and_malformed() {
        let (remote, _cache, store) = setup();
        remote.add_blob("mem://ok", r#"{"keywords": "bracket"}"#);
        remote.add_blob("mem://bad", "{not json");

        let v = store.download_json("mem://ok").await.unwrap();
        assert_eq!(v["keywords"], "bracket");
        store.download_json("mem://ok").await.unwrap();
        assert_eq!(remote.blob_fetches(), 1);

        let err = store.download_json("mem://bad").await.unwrap_err();
        assert!(matches!(err, ConstructError::MalformedSideCar { .. }));
    }

    #[tokio::test]
    async fn test_data_uri() {
        let (remote, _cache, store) = setup();
        remote.add_blob("mem://thumb", "png");
        let uri = store.data_uri("mem://thumb", "image/png").await.unwrap();
        assert_eq!(uri, "data:image/png;base64,cG5n");
    }
}
