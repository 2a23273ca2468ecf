//! Remote repository API: wire types, the client trait and branch resolution

mod github;
mod memory;

pub use github::{GithubClient, DEFAULT_API_URL};
pub use memory::InMemoryRemote;

use crate::error::ConstructError;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message the hosting API returns for a missing branch. On a repository's own
/// default branch it means the repository has no commits yet.
pub const BRANCH_NOT_FOUND: &str = "Branch not found";

/// Repository metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRef {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub tree: TreeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCommit {
    #[serde(default)]
    pub sha: String,
    pub commit: CommitDetail,
}

/// Branch with its head commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: BranchCommit,
}

impl Branch {
    pub fn head_tree_sha(&self) -> &str {
        &self.commit.commit.tree.sha
    }
}

/// Kind of a tree listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodules and anything else the listing may contain
    #[serde(other)]
    Other,
}

/// One entry of a recursive tree listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    pub sha: String,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>, url: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Blob,
            size: Some(size),
            url: Some(url.into()),
            sha: sha.into(),
        }
    }

    pub fn tree(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Tree,
            size: None,
            url: None,
            sha: sha.into(),
        }
    }

    /// Git tree ordering: directories compare as if their name ended in `/`.
    ///
    /// Sorting by this key puts every directory directly before its contents.
    pub fn order_key(&self) -> String {
        match self.kind {
            EntryKind::Tree => format!("{}/", self.path),
            _ => self.path.clone(),
        }
    }
}

/// Sort entries into the path order the tree builder requires
pub fn sort_entries(entries: &mut [TreeEntry]) {
    entries.sort_by_cached_key(TreeEntry::order_key);
}

/// Recursive tree listing for one tree hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub sha: String,
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

/// Blob body as returned by the JSON blob endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub content: String,
    pub encoding: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url: String,
}

impl Blob {
    /// Decoded bytes of the blob
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        if self.encoding == "base64" {
            base64::engine::general_purpose::STANDARD.decode(self.base64_content())
        } else {
            Ok(self.content.clone().into_bytes())
        }
    }

    /// Content as a single-line base64 string, encoding it if necessary
    pub fn base64_content(&self) -> String {
        if self.encoding == "base64" {
            self.content.split_whitespace().collect()
        } else {
            base64::engine::general_purpose::STANDARD.encode(self.content.as_bytes())
        }
    }
}

/// Read operations against a Git hosting API
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Look up a repository by `owner/name`
    async fn repository(&self, full_name: &str) -> crate::Result<Repository>;

    /// Look up a branch and its head commit
    async fn branch(&self, full_name: &str, branch: &str) -> crate::Result<Branch>;

    /// Recursive listing of a tree hash
    async fn tree(&self, full_name: &str, tree_sha: &str) -> crate::Result<Tree>;

    /// Blob body (usually base64) from a blob URL
    async fn blob(&self, url: &str) -> crate::Result<Blob>;

    /// Raw blob bytes from a blob URL
    async fn raw_blob(&self, url: &str) -> crate::Result<Vec<u8>>;

    /// Repositories owned by a user or organization
    async fn owner_repositories(&self, owner: &str) -> crate::Result<Vec<Repository>>;
}

pub type SharedApi = Arc<dyn RepositoryApi>;

/// A branch resolved to its head tree hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBranch {
    pub name: String,
    pub head_tree_sha: String,
}

/// Resolve `branch` (or the default branch) to its head tree hash.
///
/// Returns `Ok(None)` for a repository without commits: its default branch
/// does not exist yet. A missing explicitly-named branch is `NotFound`.
pub async fn resolve_branch(
    api: &dyn RepositoryApi,
    full_name: &str,
    branch: Option<&str>,
) -> crate::Result<Option<ResolvedBranch>> {
    let mut default_branch = None;
    let name = match branch {
        Some(b) => b.to_string(),
        None => {
            let repo = api.repository(full_name).await?;
            default_branch = Some(repo.default_branch.clone());
            repo.default_branch
        }
    };

    let err = match api.branch(full_name, &name).await {
        Ok(b) => {
            return Ok(Some(ResolvedBranch {
                head_tree_sha: b.head_tree_sha().to_string(),
                name: b.name,
            }))
        }
        Err(err) => err,
    };

    let ConstructError::NotFound { message, .. } = &err else {
        return Err(err);
    };
    if message != BRANCH_NOT_FOUND {
        return Err(err);
    }

    let default_branch = match default_branch {
        Some(d) => d,
        None => api.repository(full_name).await?.default_branch,
    };
    if default_branch == name {
        tracing::debug!(repo = full_name, branch = %name, "repository has no commits");
        Ok(None)
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, dir: bool) -> TreeEntry {
        if dir {
            TreeEntry::tree(path, "t")
        } else {
            TreeEntry::blob(path, "b", "u", 1)
        }
    }

    #[test]
    fn test_sort_entries_git_order() {
        let mut entries = vec![
            entry("a/x.step", false),
            entry("a-b.step", false),
            entry("a", true),
            entry("a.step", false),
        ];
        sort_entries(&mut entries);
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a-b.step", "a.step", "a", "a/x.step"]);
    }

    #[test]
    fn test_tree_entry_deserialize() {
        let json = r#"{"path":"a/part.step","mode":"100644","type":"blob","size":12,"sha":"abc","url":"https://api/blobs/abc"}"#;
        let e: TreeEntry = serde_json::from_str(json).unwrap();
        assert_eq!(e.kind, EntryKind::Blob);
        assert_eq!(e.size, Some(12));

        let json = r#"{"path":"vendor/lib","mode":"160000","type":"commit","sha":"def"}"#;
        let e: TreeEntry = serde_json::from_str(json).unwrap();
        assert_eq!(e.kind, EntryKind::Other);
    }

    #[test]
    fn test_branch_head_tree() {
        let json = r#"{"name":"main","commit":{"sha":"c1","commit":{"tree":{"sha":"t1","url":"x"},"message":"m"}}}"#;
        let b: Branch = serde_json::from_str(json).unwrap();
        assert_eq!(b.head_tree_sha(), "t1");
    }

    #[test]
    fn test_blob_decode() {
        let blob = Blob {
            content: "eyJh\nIjoxfQ==\n".to_string(),
            encoding: "base64".to_string(),
            sha: String::new(),
            size: 7,
            url: String::new(),
        };
        assert_eq!(blob.decode().unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(blob.base64_content(), "eyJhIjoxfQ==");
    }

    #[tokio::test]
    async fn test_resolve_branch_empty_repository() {
        let remote = InMemoryRemote::new();
        remote.add_repository("acme/empty", "main");
        let resolved = resolve_branch(&remote, "acme/empty", None).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_resolve_branch_missing() {
        let remote = InMemoryRemote::new();
        remote.add_repository("acme/parts", "main");
        remote.set_branch("acme/parts", "main", "t1");

        let resolved = resolve_branch(&remote, "acme/parts", None).await.unwrap().unwrap();
        assert_eq!(resolved.head_tree_sha, "t1");

        let err = resolve_branch(&remote, "acme/parts", Some("dev")).await.unwrap_err();
        assert!(matches!(err, ConstructError::NotFound { .. }));

        let err = resolve_branch(&remote, "acme/nope", None).await.unwrap_err();
        assert!(matches!(err, ConstructError::NotFound { .. }));
    }
}
