//! Narrow a repository tree to one of its directories

use crate::error::ConstructError;
use crate::node::{NodeKind, TreeNode};

/// Children of the directory at `root_path`, re-rooted so that paths and ids
/// are relative to it.
///
/// Every segment of `root_path` must name a directory. An empty path (or
/// `/`) returns the tree unchanged.
pub fn extract(tree: Vec<TreeNode>, root_path: &str) -> crate::Result<Vec<TreeNode>> {
    let root = root_path.trim_matches('/');
    if root.is_empty() {
        return Ok(tree);
    }

    let mut level = tree;
    for segment in root.split('/') {
        let found = level
            .into_iter()
            .find(|n| n.kind() == NodeKind::Tree && n.name() == segment);
        level = match found {
            Some(TreeNode::Tree(dir)) => dir.children,
            _ => return Err(ConstructError::InvalidPath(root.to_string())),
        };
    }

    let prefix = format!("{}/", root);
    Ok(strip_root(level, &prefix))
}

fn strip_prefix_owned(value: &str, prefix: &str) -> String {
    value.strip_prefix(prefix).unwrap_or(value).to_string()
}

fn rewrite_id(id: &str, prefix: &str) -> String {
    match id.split_once('|') {
        Some((collection, path)) => format!("{}|{}", collection, strip_prefix_owned(path, prefix)),
        None => strip_prefix_owned(id, prefix),
    }
}

fn strip_root(tree: Vec<TreeNode>, prefix: &str) -> Vec<TreeNode> {
    tree.into_iter()
        .map(|node| match node {
            TreeNode::Tree(mut dir) => {
                dir.id = rewrite_id(&dir.id, prefix);
                dir.path = strip_prefix_owned(&dir.path, prefix);
                dir.children = strip_root(std::mem::take(&mut dir.children), prefix);
                TreeNode::Tree(dir)
            }
            TreeNode::Blob(mut blob) => {
                blob.id = rewrite_id(&blob.id, prefix);
                blob.path = strip_prefix_owned(&blob.path, prefix);
                TreeNode::Blob(blob)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_tree, BuildContext};
    use crate::content_type::ContentType;
    use crate::remote::{sort_entries, TreeEntry};

    fn tree() -> Vec<TreeNode> {
        let mut entries = vec![
            TreeEntry::tree("hw", "s1"),
            TreeEntry::tree("hw/bolts", "s2"),
            TreeEntry::blob("hw/bolts/m3.step", "b1", "u1", 1),
            TreeEntry::blob("hw/nut.step", "b2", "u2", 1),
            TreeEntry::blob("top.step", "b3", "u3", 1),
        ];
        sort_entries(&mut entries);
        let ctx = BuildContext {
            collection_id: "c",
            repo: "acme/parts",
            branch: "main",
        };
        build_tree(&entries, "", &ctx)
    }

    #[test]
    fn test_extract_rewrites_paths_and_ids() {
        let sub = extract(tree(), "/hw/").unwrap();
        assert_eq!(sub.len(), 2);

        let bolts = &sub[0];
        assert_eq!(bolts.path(), "bolts");
        assert_eq!(bolts.id(), "c|bolts");
        let m3 = bolts.children()[0].as_blob().unwrap();
        assert_eq!(m3.path, "bolts/m3");
        assert_eq!(m3.id, "c|bolts/m3.step");
        // facets still point at the physical file
        assert_eq!(m3.content_types[&ContentType::Step].path, "hw/bolts/m3.step");

        assert_eq!(sub[1].path(), "nut");
    }

    #[test]
    fn test_extract_nested() {
        let sub = extract(tree(), "hw/bolts").unwrap();
        assert_eq!(sub[0].path(), "m3");
        assert_eq!(sub[0].id(), "c|m3.step");
    }

    #[test]
    fn test_extract_empty_root_is_identity() {
        assert_eq!(extract(tree(), "/").unwrap(), tree());
    }

    #[test]
    fn test_extract_missing_or_blob_segment() {
        let err = extract(tree(), "hw/missing").unwrap_err();
        assert!(matches!(err, ConstructError::InvalidPath(p) if p == "hw/missing"));
        assert!(extract(tree(), "top").is_err());
    }
}
