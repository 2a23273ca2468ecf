//! Merge per-repository trees into one collection tree

use crate::error::ConstructError;
use crate::node::TreeNode;
use std::collections::HashSet;

/// Merge `incoming` into `existing`.
///
/// Rules:
/// - Nodes match on equal name and kind; unmatched incoming nodes are appended.
/// - Matched directories merge their children recursively.
/// - Matched assets union their facets, incoming facets winning on collision,
///   so a later repository overrides an earlier one for the same facet.
/// - Source hashes are appended without deduplication. Merging the same
///   repository twice therefore repeats them; [`TreeMerger`] rejects that.
pub fn merge_trees(mut existing: Vec<TreeNode>, incoming: Vec<TreeNode>) -> Vec<TreeNode> {
    for node in incoming {
        let matched = existing
            .iter()
            .position(|n| n.kind() == node.kind() && n.name() == node.name());
        match matched {
            Some(i) => merge_node(&mut existing[i], node),
            None => existing.push(node),
        }
    }
    existing
}

fn merge_node(target: &mut TreeNode, incoming: TreeNode) {
    match (target, incoming) {
        (TreeNode::Tree(target), TreeNode::Tree(incoming)) => {
            target.sources.extend(incoming.sources);
            let children = std::mem::take(&mut target.children);
            target.children = merge_trees(children, incoming.children);
        }
        (TreeNode::Blob(target), TreeNode::Blob(incoming)) => {
            target.sources.extend(incoming.sources);
            target.content_types.extend(incoming.content_types);
            if let Some(meta) = incoming.meta {
                target.meta.get_or_insert_with(Default::default).extend(meta);
            }
        }
        // kinds are matched by the caller
        _ => {}
    }
}

/// Accumulates repository trees for one collection.
///
/// Each source identity (repository, branch and subpath) may be merged once.
#[derive(Debug, Default)]
pub struct TreeMerger {
    tree: Vec<TreeNode>,
    merged: HashSet<String>,
}

impl TreeMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one repository's nodes into the collection tree
    pub fn merge(&mut self, identity: &str, incoming: Vec<TreeNode>) -> crate::Result<()> {
        if !self.merged.insert(identity.to_string()) {
            return Err(ConstructError::DuplicateSource(identity.to_string()));
        }
        let existing = std::mem::take(&mut self.tree);
        self.tree = merge_trees(existing, incoming);
        Ok(())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.merged.contains(identity)
    }

    pub fn tree(&self) -> &[TreeNode] {
        &self.tree
    }

    pub fn into_tree(self) -> Vec<TreeNode> {
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_tree, BuildContext};
    use crate::content_type::ContentType;
    use crate::remote::{sort_entries, TreeEntry};

    fn repo_tree(repo: &str, paths: &[&str]) -> Vec<TreeNode> {
        let mut entries: Vec<TreeEntry> = paths
            .iter()
            .map(|p| match p.strip_suffix('/') {
                Some(dir) => TreeEntry::tree(dir, format!("{}:{}", repo, dir)),
                None => TreeEntry::blob(*p, format!("{}:{}", repo, p), format!("{}/{}", repo, p), 1),
            })
            .collect();
        sort_entries(&mut entries);
        let ctx = BuildContext {
            collection_id: "c",
            repo,
            branch: "main",
        };
        build_tree(&entries, "", &ctx)
    }

    #[test]
    fn test_merge_into_empty_is_identity() {
        let tree = repo_tree("r1", &["a/", "a/part.step"]);
        assert_eq!(merge_trees(Vec::new(), tree.clone()), tree);
    }

    #[test]
    fn test_merge_of_self_keeps_single_nodes() {
        let tree = repo_tree("r1", &["a/", "a/part.step", "a/part.png"]);
        let once = merge_trees(Vec::new(), tree.clone());
        let twice = merge_trees(once.clone(), tree);

        assert_eq!(twice.len(), 1);
        let blobs = twice[0].children();
        assert_eq!(blobs.len(), 1);
        assert_eq!(
            blobs[0].as_blob().unwrap().content_types,
            once[0].children()[0].as_blob().unwrap().content_types
        );
        // sources are appended, not deduplicated
        assert_eq!(twice[0].sources().len(), 2);
    }

    #[test]
    fn test_merge_combines_repositories() {
        let left = repo_tree("r1", &["a/", "a/part.step", "a/only-left.dxf"]);
        let right = repo_tree("r2", &["a/", "a/part.f3d", "b/", "b/other.svg"]);
        let merged = merge_trees(left, right);

        assert_eq!(merged.len(), 2);
        let a = &merged[0];
        assert_eq!(a.sources(), ["r1:a".to_string(), "r2:a".to_string()]);
        let part = a
            .children()
            .iter()
            .find(|n| n.name() == "part")
            .and_then(|n| n.as_blob())
            .unwrap();
        assert_eq!(part.content_types[&ContentType::Step].source_repo, "r1");
        assert_eq!(part.content_types[&ContentType::F3d].source_repo, "r2");
    }

    #[test]
    fn test_later_repository_wins_facet_collision() {
        let left = repo_tree("r1", &["part.step"]);
        let right = repo_tree("r2", &["part.step"]);
        let merged = merge_trees(left, right);
        let part = merged[0].as_blob().unwrap();
        assert_eq!(part.content_types[&ContentType::Step].source_repo, "r2");
    }

    #[test]
    fn test_same_name_different_kind_not_merged() {
        let left = repo_tree("r1", &["part/", "part/x.step"]);
        let right = repo_tree("r2", &["part.step"]);
        let merged = merge_trees(left, right);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merger_rejects_duplicate_source() {
        let mut merger = TreeMerger::new();
        merger.merge("acme/parts#main", repo_tree("r1", &["part.step"])).unwrap();
        assert!(merger.contains("acme/parts#main"));

        let err = merger
            .merge("acme/parts#main", repo_tree("r1", &["part.step"]))
            .unwrap_err();
        assert!(matches!(err, ConstructError::DuplicateSource(_)));
        assert_eq!(merger.tree()[0].sources().len(), 1);

        merger.merge("acme/parts#dev", repo_tree("r1", &["part.step"])).unwrap();
        assert_eq!(merger.into_tree()[0].sources().len(), 2);
    }
}
