//! In-memory repository API for offline use and tests

use super::{
    sort_entries, Blob, Branch, BranchCommit, CommitDetail, Repository, RepositoryApi, Tree,
    TreeEntry, TreeRef, BRANCH_NOT_FOUND,
};
use crate::error::ConstructError;
use async_trait::async_trait;
use base64::Engine;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct RepoFixture {
    repository: Option<Repository>,
    /// branch name -> head tree sha
    branches: HashMap<String, String>,
}

#[derive(Default)]
struct State {
    /// lower-cased full name -> fixture
    repos: HashMap<String, RepoFixture>,
    trees: HashMap<String, Vec<TreeEntry>>,
    blobs: HashMap<String, Vec<u8>>,
}

/// Repository API backed by in-process maps.
///
/// Counts listing and blob fetches so callers can observe cache behavior.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
    tree_fetches: AtomicUsize,
    blob_fetches: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> crate::Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| ConstructError::Cache(format!("remote state poisoned: {e}")))
    }

    fn state_mut(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a repository without any branches (no commits yet)
    pub fn add_repository(&self, full_name: &str, default_branch: &str) {
        let name = full_name.rsplit('/').next().unwrap_or(full_name).to_string();
        let mut state = self.state_mut();
        let fixture = state.repos.entry(full_name.to_lowercase()).or_default();
        fixture.repository = Some(Repository {
            name,
            full_name: full_name.to_string(),
            default_branch: default_branch.to_string(),
        });
    }

    /// Point a branch at a tree hash, creating or moving its head
    pub fn set_branch(&self, full_name: &str, branch: &str, tree_sha: &str) {
        let mut state = self.state_mut();
        state
            .repos
            .entry(full_name.to_lowercase())
            .or_default()
            .branches
            .insert(branch.to_string(), tree_sha.to_string());
    }

    pub fn add_tree(&self, tree_sha: &str, entries: Vec<TreeEntry>) {
        self.state_mut().trees.insert(tree_sha.to_string(), entries);
    }

    pub fn add_blob(&self, url: &str, content: impl Into<Vec<u8>>) {
        self.state_mut().blobs.insert(url.to_string(), content.into());
    }

    /// Publish a commit: build a sorted listing for `files`, store every blob
    /// under `mem://<tree_sha>/<path>` and move the branch head to `tree_sha`.
    ///
    /// Directory hashes are derived from the tree hash and the directory path.
    pub fn commit(&self, full_name: &str, branch: &str, tree_sha: &str, files: &[(&str, &str)]) {
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, content) in files {
            let mut parent = *path;
            while let Some((dir, _)) = parent.rsplit_once('/') {
                dirs.insert(dir.to_string());
                parent = dir;
            }
            let url = format!("mem://{}/{}", tree_sha, path);
            let sha = format!("{}:{}", tree_sha, path);
            entries.push(TreeEntry::blob(*path, sha, url.as_str(), content.len() as u64));
            self.add_blob(&url, content.as_bytes());
        }
        for dir in dirs {
            let sha = format!("{}:{}/", tree_sha, dir);
            entries.push(TreeEntry::tree(dir, sha));
        }
        sort_entries(&mut entries);
        self.add_tree(tree_sha, entries);
        self.set_branch(full_name, branch, tree_sha);
    }

    /// Number of recursive listings served
    pub fn tree_fetches(&self) -> usize {
        self.tree_fetches.load(Ordering::SeqCst)
    }

    /// Number of blobs served (JSON and raw)
    pub fn blob_fetches(&self) -> usize {
        self.blob_fetches.load(Ordering::SeqCst)
    }

    fn blob_bytes(&self, url: &str) -> crate::Result<Vec<u8>> {
        self.blob_fetches.fetch_add(1, Ordering::SeqCst);
        self.state()?
            .blobs
            .get(url)
            .cloned()
            .ok_or_else(|| not_found("blob", "Not Found"))
    }
}

fn not_found(resource: &str, message: &str) -> ConstructError {
    ConstructError::NotFound {
        resource: resource.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl RepositoryApi for InMemoryRemote {
    async fn repository(&self, full_name: &str) -> crate::Result<Repository> {
        self.state()?
            .repos
            .get(&full_name.to_lowercase())
            .and_then(|f| f.repository.clone())
            .ok_or_else(|| not_found("repository", "Not Found"))
    }

    async fn branch(&self, full_name: &str, branch: &str) -> crate::Result<Branch> {
        let state = self.state()?;
        let fixture = state
            .repos
            .get(&full_name.to_lowercase())
            .filter(|f| f.repository.is_some())
            .ok_or_else(|| not_found("repository", "Not Found"))?;
        let tree_sha = fixture
            .branches
            .get(branch)
            .ok_or_else(|| not_found("branch", BRANCH_NOT_FOUND))?;
        Ok(Branch {
            name: branch.to_string(),
            commit: BranchCommit {
                sha: format!("commit-{}", tree_sha),
                commit: CommitDetail {
                    tree: TreeRef {
                        sha: tree_sha.clone(),
                    },
                },
            },
        })
    }

    async fn tree(&self, _full_name: &str, tree_sha: &str) -> crate::Result<Tree> {
        self.tree_fetches.fetch_add(1, Ordering::SeqCst);
        let entries = self
            .state()?
            .trees
            .get(tree_sha)
            .cloned()
            .ok_or_else(|| not_found("tree", "Not Found"))?;
        Ok(Tree {
            sha: tree_sha.to_string(),
            tree: entries,
            truncated: false,
        })
    }

    async fn blob(&self, url: &str) -> crate::Result<Blob> {
        let bytes = self.blob_bytes(url)?;
        Ok(Blob {
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            encoding: "base64".to_string(),
            sha: String::new(),
            size: bytes.len() as u64,
            url: url.to_string(),
        })
    }

    async fn raw_blob(&self, url: &str) -> crate::Result<Vec<u8>> {
        self.blob_bytes(url)
    }

    async fn owner_repositories(&self, owner: &str) -> crate::Result<Vec<Repository>> {
        let prefix = format!("{}/", owner.to_lowercase());
        let mut repos: Vec<Repository> = self
            .state()?
            .repos
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, f)| f.repository.clone())
            .collect();
        repos.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(repos)
    }
}
