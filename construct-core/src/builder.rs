//! Build nested nodes from a flat recursive tree listing

use crate::content_type::{classify, strip_extension};
use crate::node::{BlobNode, ContentTypeEntry, ContentTypes, DirNode, TreeNode};
use crate::remote::{EntryKind, TreeEntry};

/// Where the entries being built come from
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Prefix of every node id (`<collection_id>|<path>`)
    pub collection_id: &'a str,
    pub repo: &'a str,
    pub branch: &'a str,
}

/// Node id within a collection
pub fn node_id(collection_id: &str, path: &str) -> String {
    format!("{}|{}", collection_id, path)
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Build the nodes under `root` (`""` for the whole listing, otherwise a
/// directory path ending in `/`).
///
/// `entries` must be in git tree order (see [`crate::remote::sort_entries`]):
/// each directory directly followed by its contents, and the facets of one
/// asset adjacent. Facets are only merged with the immediately preceding
/// sibling, so unsorted input yields split or missing nodes.
pub fn build_tree(entries: &[TreeEntry], root: &str, ctx: &BuildContext<'_>) -> Vec<TreeNode> {
    let start = entries
        .iter()
        .position(|e| e.path.starts_with(root))
        .unwrap_or(entries.len());
    build_level(entries, start, root, ctx).0
}

/// Consume entries from `cursor` while they fall under `root`.
///
/// Returns the built siblings and the cursor just past the last consumed entry.
fn build_level(
    entries: &[TreeEntry],
    mut cursor: usize,
    root: &str,
    ctx: &BuildContext<'_>,
) -> (Vec<TreeNode>, usize) {
    let mut results: Vec<TreeNode> = Vec::new();

    while let Some(entry) = entries.get(cursor) {
        if !entry.path.starts_with(root) {
            break;
        }
        cursor += 1;

        match entry.kind {
            EntryKind::Tree => {
                let child_root = format!("{}/", entry.path);
                let (children, next) = build_level(entries, cursor, &child_root, ctx);
                cursor = next;
                if children.is_empty() {
                    continue;
                }
                results.push(TreeNode::Tree(DirNode {
                    id: node_id(ctx.collection_id, &entry.path),
                    name: last_segment(&entry.path).to_string(),
                    path: entry.path.clone(),
                    sources: vec![entry.sha.clone()],
                    children,
                }));
            }
            EntryKind::Blob => {
                let Some(content_type) = classify(&entry.path) else {
                    continue;
                };
                let path = strip_extension(&entry.path);
                let facet = ContentTypeEntry {
                    content_type,
                    url: entry.url.clone().unwrap_or_default(),
                    size: entry.size.unwrap_or(0),
                    source_repo: ctx.repo.to_string(),
                    source_branch: ctx.branch.to_string(),
                    path: entry.path.clone(),
                    sha: entry.sha.clone(),
                };

                if let Some(TreeNode::Blob(prev)) = results.last_mut() {
                    if prev.path == path {
                        prev.content_types.insert(content_type, facet);
                        prev.sources.push(entry.sha.clone());
                        continue;
                    }
                }

                let mut content_types = ContentTypes::new();
                content_types.insert(content_type, facet);
                results.push(TreeNode::Blob(BlobNode {
                    id: node_id(ctx.collection_id, &entry.path),
                    name: last_segment(path).to_string(),
                    path: path.to_string(),
                    sources: vec![entry.sha.clone()],
                    content_types,
                    meta: None,
                }));
            }
            EntryKind::Other => {}
        }
    }

    (results, cursor)
}
