//! Side-car metadata: per-file JSON, per-directory manifests and their cache

use crate::cache::{get_json, meta_key, set_json};
use crate::content_type::{strip_extension, ContentType};
use crate::error::ConstructError;
use crate::node::{blob_by_path_mut, BlobNode, MetaRecord, TreeNode};
use crate::snapshot::SnapshotStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;

/// Name (extension stripped) of the per-directory manifest
pub const DIR_MANIFEST_NAME: &str = "_meta";

/// Reserved metadata key holding a space-joined keyword set
pub const KEYWORDS: &str = "keywords";

/// Cached metadata of one directory level: relative path -> record.
///
/// Direct children are keyed by name; assets below the level that a manifest
/// reached are keyed by their relative path.
type LevelMeta = BTreeMap<String, MetaRecord>;

type LevelFuture<'s> = Pin<Box<dyn Future<Output = crate::Result<Vec<TreeNode>>> + Send + 's>>;

fn keyword_tokens(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => s.split_whitespace().collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(str::split_whitespace)
            .collect(),
        _ => Vec::new(),
    }
}

/// Merge two keyword values (strings or arrays of strings).
///
/// Tokens keep the casing and position of their first occurrence; later
/// tokens equal ignoring case are dropped. `None` when nothing remains.
pub fn merge_keywords(first: Option<&Value>, second: Option<&Value>) -> Option<String> {
    let mut seen = HashSet::new();
    let merged: Vec<&str> = keyword_tokens(first)
        .into_iter()
        .chain(keyword_tokens(second))
        .filter(|kw| seen.insert(kw.to_lowercase()))
        .collect();
    if merged.is_empty() {
        None
    } else {
        Some(merged.join(" "))
    }
}

/// Overlay `patch` onto `base`; keywords are merged instead of replaced
pub fn merge_meta(base: Option<MetaRecord>, patch: &MetaRecord) -> MetaRecord {
    let mut merged = base.unwrap_or_default();
    let keywords = merge_keywords(merged.get(KEYWORDS), patch.get(KEYWORDS));
    merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
    match keywords {
        Some(kw) => {
            merged.insert(KEYWORDS.to_string(), Value::String(kw));
        }
        None => {
            merged.remove(KEYWORDS);
        }
    }
    merged
}

/// Apply a directory manifest to the assets of one level.
///
/// Keys are paths relative to the level, with or without the file extension.
/// Entries that are not objects or name no asset are skipped. Returns the
/// paths of the assets that were updated.
pub fn apply_manifest(level: &mut [TreeNode], manifest: &MetaRecord) -> Vec<String> {
    let mut applied = Vec::new();
    for (path, value) in manifest {
        let Value::Object(patch) = value else {
            tracing::debug!(path = %path, "skipping non-object manifest entry");
            continue;
        };
        let target = if blob_by_path_mut(level, path).is_some() {
            path.as_str()
        } else {
            strip_extension(path)
        };
        let Some(blob) = blob_by_path_mut(level, target) else {
            tracing::debug!(path = %path, "manifest entry matches no asset");
            continue;
        };
        blob.meta = Some(merge_meta(blob.meta.take(), patch));
        applied.push(target.to_string());
    }
    applied
}

fn non_empty(record: MetaRecord) -> Option<MetaRecord> {
    if record.is_empty() {
        None
    } else {
        Some(record)
    }
}

/// Counters reported after an indexing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub nodes_visited: usize,
    pub side_cars_fetched: usize,
    pub side_cars_failed: usize,
    pub manifests_applied: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Outcome of downloading one side-car or manifest
enum Fetched {
    Record(MetaRecord),
    /// Content is unusable; the same bytes will always fail
    Malformed,
    /// Remote failure; may succeed on a later run
    Unavailable,
}

/// Attaches side-car metadata to a tree, one cached snapshot per directory.
///
/// A directory's snapshot is keyed by the tree hashes contributing to it, so
/// it stays valid exactly as long as the directory's content does.
pub struct MetadataIndexer<'a> {
    store: &'a SnapshotStore,
    progress: Option<&'a mut (dyn FnMut(&TreeNode) + Send + 'a)>,
    stats: IndexStats,
}

impl<'a> MetadataIndexer<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self {
            store,
            progress: None,
            stats: IndexStats::default(),
        }
    }

    /// Call `progress` for every node before it is indexed
    pub fn with_progress(mut self, progress: &'a mut (dyn FnMut(&TreeNode) + Send + 'a)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Index a whole tree whose top level is described by `tree_shas`.
    ///
    /// Download failures never fail the pass; only cache errors do.
    pub async fn index(
        &mut self,
        tree: Vec<TreeNode>,
        tree_shas: &[String],
    ) -> crate::Result<Vec<TreeNode>> {
        self.index_level(tree, tree_shas.to_vec()).await
    }

    fn index_level<'s>(&'s mut self, level: Vec<TreeNode>, shas: Vec<String>) -> LevelFuture<'s> {
        Box::pin(async move {
            let key = meta_key(&shas);
            let cached: Option<LevelMeta> = get_json(self.store.cache(), &key).await?;
            if cached.is_some() {
                self.stats.cache_hits += 1;
                tracing::debug!(key = %key, "meta cache hit");
            } else {
                self.stats.cache_misses += 1;
                tracing::debug!(key = %key, "meta cache miss");
            }

            let mut cacheable = true;
            let mut results = Vec::with_capacity(level.len());
            for node in level {
                self.stats.nodes_visited += 1;
                if let Some(progress) = self.progress.as_deref_mut() {
                    progress(&node);
                }
                match node {
                    TreeNode::Tree(mut dir) => {
                        let children = std::mem::take(&mut dir.children);
                        dir.children = self.index_level(children, dir.sources.clone()).await?;
                        results.push(TreeNode::Tree(dir));
                    }
                    TreeNode::Blob(mut blob) => {
                        match &cached {
                            Some(map) => blob.meta = map.get(&blob.name).cloned(),
                            None if blob.name != DIR_MANIFEST_NAME => {
                                cacheable &= self.attach_side_car(&mut blob).await;
                            }
                            None => {}
                        }
                        results.push(TreeNode::Blob(blob));
                    }
                }
            }

            let manifest = results.iter().position(|n| {
                n.as_blob().is_some_and(|b| {
                    b.name == DIR_MANIFEST_NAME && b.content_types.contains_key(&ContentType::Meta)
                })
            });
            let manifest = manifest.and_then(|i| match results.remove(i) {
                TreeNode::Blob(b) => Some(b),
                TreeNode::Tree(_) => None,
            });

            match cached {
                Some(map) => {
                    // nested entries were written by this level's manifest
                    for (path, record) in map.into_iter().filter(|(p, _)| p.contains('/')) {
                        if let Some(blob) = blob_by_path_mut(&mut results, &path) {
                            blob.meta = Some(record);
                        }
                    }
                }
                None => {
                    let mut nested = Vec::new();
                    if let Some(manifest) = manifest {
                        match self.apply_dir_manifest(&manifest, &mut results).await {
                            Some(applied) => nested = applied,
                            None => cacheable = false,
                        }
                    }
                    if cacheable {
                        let snapshot = level_snapshot(&mut results, &nested);
                        set_json(self.store.cache(), &key, &snapshot).await?;
                    } else {
                        tracing::debug!(key = %key, "not caching level after failed download");
                    }
                }
            }

            Ok(results)
        })
    }

    async fn fetch_record(&mut self, url: &str) -> Fetched {
        match self.store.download_json(url).await {
            Ok(Value::Object(record)) => {
                self.stats.side_cars_fetched += 1;
                Fetched::Record(record)
            }
            Ok(_) => {
                self.stats.side_cars_failed += 1;
                tracing::warn!(url, "side-car is not a JSON object");
                Fetched::Malformed
            }
            Err(ConstructError::MalformedSideCar { message, .. }) => {
                self.stats.side_cars_failed += 1;
                tracing::warn!(url, error = %message, "malformed side-car");
                Fetched::Malformed
            }
            Err(e) => {
                self.stats.side_cars_failed += 1;
                tracing::warn!(url, error = %e, "side-car download failed");
                Fetched::Unavailable
            }
        }
    }

    /// Returns false when the download failed in a way worth retrying
    async fn attach_side_car(&mut self, blob: &mut BlobNode) -> bool {
        let Some(facet) = blob.content_types.get(&ContentType::Meta) else {
            return true;
        };
        let url = facet.url.clone();
        match self.fetch_record(&url).await {
            Fetched::Record(record) => {
                blob.meta = non_empty(merge_meta(None, &record));
                true
            }
            Fetched::Malformed => true,
            Fetched::Unavailable => false,
        }
    }

    /// `None` when the manifest could not be downloaded
    async fn apply_dir_manifest(
        &mut self,
        manifest: &BlobNode,
        level: &mut [TreeNode],
    ) -> Option<Vec<String>> {
        let facet = manifest.content_types.get(&ContentType::Meta)?;
        tracing::debug!(url = %facet.url, "downloading directory manifest");
        match self.fetch_record(&facet.url).await {
            Fetched::Record(record) => {
                self.stats.manifests_applied += 1;
                Some(
                    apply_manifest(level, &record)
                        .into_iter()
                        .filter(|p| p.contains('/'))
                        .collect(),
                )
            }
            Fetched::Malformed => Some(Vec::new()),
            Fetched::Unavailable => None,
        }
    }
}

/// Metadata of one level as stored in the cache
fn level_snapshot(level: &mut [TreeNode], nested: &[String]) -> LevelMeta {
    let mut snapshot: LevelMeta = level
        .iter()
        .filter_map(TreeNode::as_blob)
        .filter_map(|b| Some((b.name.clone(), b.meta.clone()?)))
        .filter(|(_, meta)| !meta.is_empty())
        .collect();
    for path in nested {
        if let Some(meta) = blob_by_path_mut(level, path).and_then(|b| b.meta.clone()) {
            snapshot.insert(path.clone(), meta);
        }
    }
    snapshot
}
