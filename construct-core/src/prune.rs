//! Final shaping of a collection tree: pruning and deterministic ordering

use crate::node::TreeNode;
use std::cmp::Ordering;

/// Drop assets without a model or drawing facet, then directories left empty.
///
/// Children are pruned before their parent is checked.
pub fn prune(tree: Vec<TreeNode>) -> Vec<TreeNode> {
    tree.into_iter()
        .filter_map(|node| match node {
            TreeNode::Tree(mut dir) => {
                dir.children = prune(std::mem::take(&mut dir.children));
                (!dir.children.is_empty()).then_some(TreeNode::Tree(dir))
            }
            TreeNode::Blob(blob) => blob.has_model().then_some(TreeNode::Blob(blob)),
        })
        .collect()
}

/// Sibling order: directories first, then by path, then by id.
///
/// Paths compare bytewise, so the order does not depend on locale.
pub fn compare_nodes(a: &TreeNode, b: &TreeNode) -> Ordering {
    b.expandable()
        .cmp(&a.expandable())
        .then_with(|| a.path().cmp(b.path()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Sort every level of the tree with [`compare_nodes`]
pub fn sort(mut tree: Vec<TreeNode>) -> Vec<TreeNode> {
    tree.sort_by(compare_nodes);
    for node in &mut tree {
        if let TreeNode::Tree(dir) = node {
            dir.children = sort(std::mem::take(&mut dir.children));
        }
    }
    tree
}

/// Prune, then sort
pub fn finalize(tree: Vec<TreeNode>) -> Vec<TreeNode> {
    sort(prune(tree))
}
