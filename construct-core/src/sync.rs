//! Collection synchronization: load, merge, index and shape repository trees

use crate::builder::{build_tree, BuildContext};
use crate::cache::SharedCache;
use crate::collection::{collection_id, Collection, CollectionKind, LoadState};
use crate::error::ConstructError;
use crate::merge::TreeMerger;
use crate::meta::{IndexStats, MetadataIndexer};
use crate::node::{child_by_path, count_nodes, TreeNode};
use crate::prune::finalize;
use crate::remote::SharedApi;
use crate::repo_spec::RepositorySpec;
use crate::snapshot::SnapshotStore;
use crate::subtree::extract;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Download side-car metadata after merging
    pub index: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { index: true }
    }
}

/// A repository that could not be loaded; its siblings were still merged
#[derive(Debug)]
pub struct RepoFailure {
    pub spec: String,
    pub error: ConstructError,
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub tree: Vec<TreeNode>,
    /// Head tree hashes of the repositories that contributed
    pub tree_shas: Vec<String>,
    pub failures: Vec<RepoFailure>,
    /// Present when metadata indexing ran
    pub stats: Option<IndexStats>,
}

/// Summary of a collection reload
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub failures: Vec<RepoFailure>,
    pub stats: IndexStats,
    pub nodes: usize,
}

struct LoadedRepository {
    /// Repository, branch and subpath; unique within one collection
    identity: String,
    tree_sha: String,
    tree: Vec<TreeNode>,
}

fn add_stats(total: &mut IndexStats, more: &IndexStats) {
    total.nodes_visited += more.nodes_visited;
    total.side_cars_fetched += more.side_cars_fetched;
    total.side_cars_failed += more.side_cars_failed;
    total.manifests_applied += more.manifests_applied;
    total.cache_hits += more.cache_hits;
    total.cache_misses += more.cache_misses;
}

/// Builds collection trees from remote repositories through the cache
#[derive(Clone)]
pub struct Synchronizer {
    store: SnapshotStore,
}

impl Synchronizer {
    pub fn new(api: SharedApi, cache: SharedCache) -> Self {
        Self {
            store: SnapshotStore::new(api, cache),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Tree of one repository, narrowed to its subpath. `None` when the
    /// repository has no commits.
    async fn load_repository(
        &self,
        collection_id: &str,
        spec: &RepositorySpec,
        progress: &mut (dyn FnMut(&str) + Send),
    ) -> crate::Result<Option<LoadedRepository>> {
        progress(&format!("Loading {}...", spec));
        let full_name = spec.full_name();
        let Some((branch, snapshot)) = self.store.get_tree(&full_name, spec.branch.as_deref()).await?
        else {
            tracing::info!(repo = %full_name, "repository is empty");
            return Ok(None);
        };

        let resolved = spec.clone().with_branch(branch.name.clone());
        progress(&format!("Loading {}...", resolved));
        tracing::info!(
            repo = %full_name,
            branch = %branch.name,
            entries = snapshot.tree.len(),
            "loaded repository tree"
        );

        let ctx = BuildContext {
            collection_id,
            repo: &full_name,
            branch: &branch.name,
        };
        let mut tree = build_tree(&snapshot.tree, "", &ctx);
        let mut tree_sha = snapshot.sha;
        if let Some(path) = &spec.path {
            // the subtree's top level is keyed by its own directory hash
            if let Some(sha) = child_by_path(&tree, path.trim_matches('/'))
                .and_then(|dir| dir.sources().first())
            {
                tree_sha = sha.clone();
            }
            tree = extract(tree, path)?;
        }

        Ok(Some(LoadedRepository {
            identity: format!(
                "{}#{}:{}",
                full_name.to_lowercase(),
                branch.name,
                spec.path.as_deref().unwrap_or("")
            ),
            tree_sha,
            tree,
        }))
    }

    /// Merge the trees of `specs`, in order, into one pruned and sorted tree.
    ///
    /// A repository failing with a repository-scoped error is reported in
    /// [`SyncOutcome::failures`] and skipped. Listing the same repository,
    /// branch and subpath twice fails the whole call with `DuplicateSource`.
    pub async fn merged_tree(
        &self,
        collection_id: &str,
        specs: &[RepositorySpec],
        options: &SyncOptions,
        progress: &mut (dyn FnMut(&str) + Send),
    ) -> crate::Result<SyncOutcome> {
        let mut merger = TreeMerger::new();
        let mut tree_shas = Vec::new();
        let mut failures = Vec::new();

        for spec in specs {
            match self.load_repository(collection_id, spec, progress).await {
                Ok(Some(loaded)) => {
                    merger.merge(&loaded.identity, loaded.tree)?;
                    tree_shas.push(loaded.tree_sha);
                }
                Ok(None) => {}
                Err(e) if e.is_repository_scoped() => {
                    tracing::warn!(repo = %spec, error = %e, "skipping repository");
                    failures.push(RepoFailure {
                        spec: spec.to_string(),
                        error: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let mut tree = merger.into_tree();
        let mut stats = None;
        if options.index && !tree.is_empty() {
            let total = count_nodes(&tree);
            let mut done = 0usize;
            let mut per_node = |_: &TreeNode| {
                done += 1;
                progress(&format!("Indexing trees ({}/{})...", done, total));
            };
            let mut indexer = MetadataIndexer::new(&self.store).with_progress(&mut per_node);
            tree = indexer.index(tree, &tree_shas).await?;
            stats = Some(indexer.stats().clone());
        }

        Ok(SyncOutcome {
            tree: finalize(tree),
            tree_shas,
            failures,
            stats,
        })
    }

    /// Rebuild a collection's tree in full.
    ///
    /// `load_state` is `Loading` while the reload runs, `Loaded` after it
    /// succeeds and `Unloaded` if it fails; on failure the previous tree is
    /// kept.
    pub async fn reload(
        &self,
        collection: &mut Collection,
        options: &SyncOptions,
        progress: &mut (dyn FnMut(&str) + Send),
    ) -> crate::Result<ReloadReport> {
        tracing::info!(collection = %collection.name, "reloading collection");
        collection.load_state = LoadState::Loading;
        let result = match collection.kind {
            CollectionKind::Repo => self.reload_repo(collection, options, progress).await,
            CollectionKind::Org => self.reload_org(collection, options, progress).await,
        };
        collection.load_state = match result {
            Ok(_) => LoadState::Loaded,
            Err(_) => LoadState::Unloaded,
        };
        let mut report = result?;
        report.nodes = collection.node_count();
        Ok(report)
    }

    async fn reload_repo(
        &self,
        collection: &mut Collection,
        options: &SyncOptions,
        progress: &mut (dyn FnMut(&str) + Send),
    ) -> crate::Result<ReloadReport> {
        let outcome = self
            .merged_tree(&collection.id, &collection.repositories, options, progress)
            .await?;
        collection.children = outcome.tree;
        Ok(ReloadReport {
            failures: outcome.failures,
            stats: outcome.stats.unwrap_or_default(),
            nodes: 0,
        })
    }

    /// One member per repository of the owner; members without any
    /// displayable asset are dropped.
    async fn reload_org(
        &self,
        collection: &mut Collection,
        options: &SyncOptions,
        progress: &mut (dyn FnMut(&str) + Send),
    ) -> crate::Result<ReloadReport> {
        let owner = collection.org.clone().ok_or_else(|| {
            ConstructError::InvalidRepoSpec(format!("collection '{}' names no owner", collection.name))
        })?;
        progress(&format!("Listing repositories of {}...", owner));
        let repositories = self.store.api().owner_repositories(&owner).await?;

        let mut report = ReloadReport::default();
        let mut members = Vec::new();
        for repository in repositories {
            let Some((repo_owner, repo_name)) = repository.full_name.split_once('/') else {
                tracing::warn!(repo = %repository.full_name, "skipping malformed repository name");
                continue;
            };
            let spec = RepositorySpec::new(repo_owner, repo_name).with_branch(&repository.default_branch);
            let mut member = Collection::repo(repo_name, vec![spec]);
            member.id = collection_id(&repository.full_name);

            let outcome = self
                .merged_tree(&member.id, &member.repositories, options, progress)
                .await?;
            report.failures.extend(outcome.failures);
            if let Some(stats) = &outcome.stats {
                add_stats(&mut report.stats, stats);
            }
            if outcome.tree.is_empty() {
                tracing::debug!(repo = %repository.full_name, "dropping empty member");
                continue;
            }
            member.children = outcome.tree;
            member.load_state = LoadState::Loaded;
            members.push(member);
        }

        collection.members = members;
        Ok(report)
    }
}
