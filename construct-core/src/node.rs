//! Tree node model shared by the builder, merger, indexer and UI consumers

use crate::content_type::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form JSON metadata attached to an asset node
pub type MetaRecord = serde_json::Map<String, Value>;

/// Content-type facets of one logical asset, ordered for stable output
pub type ContentTypes = BTreeMap<ContentType, ContentTypeEntry>;

/// One physical blob backing one facet of a logical asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeEntry {
    pub content_type: ContentType,
    /// API URL of the blob
    pub url: String,
    pub size: u64,
    pub source_repo: String,
    pub source_branch: String,
    /// Full path of the physical file, extension included
    pub path: String,
    pub sha: String,
}

/// Node discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Tree,
    Blob,
}

/// A directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirNode {
    pub id: String,
    pub name: String,
    pub path: String,
    /// Tree hashes of every repository contributing to this directory
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/// A logical asset made of one or more facets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobNode {
    pub id: String,
    pub name: String,
    /// Path with the extension stripped
    pub path: String,
    /// Blob hashes of the files that contributed to this node
    #[serde(default)]
    pub sources: Vec<String>,
    pub content_types: ContentTypes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaRecord>,
}

impl BlobNode {
    /// True when at least one model or drawing facet is present
    pub fn has_model(&self) -> bool {
        self.content_types.keys().any(|ct| ct.is_model())
    }

    /// Facet to use as a preview image: the thumbnail, else the SVG drawing
    pub fn preview_facet(&self) -> Option<&ContentTypeEntry> {
        self.content_types
            .get(&ContentType::Thumb)
            .or_else(|| self.content_types.get(&ContentType::Svg))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeNode {
    Tree(DirNode),
    Blob(BlobNode),
}

impl TreeNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Tree(d) => &d.id,
            Self::Blob(b) => &b.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Tree(d) => &d.name,
            Self::Blob(b) => &b.name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Tree(d) => &d.path,
            Self::Blob(b) => &b.path,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Tree(_) => NodeKind::Tree,
            Self::Blob(_) => NodeKind::Blob,
        }
    }

    pub fn sources(&self) -> &[String] {
        match self {
            Self::Tree(d) => &d.sources,
            Self::Blob(b) => &b.sources,
        }
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            Self::Tree(d) => &d.children,
            Self::Blob(_) => &[],
        }
    }

    pub fn as_blob(&self) -> Option<&BlobNode> {
        match self {
            Self::Blob(b) => Some(b),
            Self::Tree(_) => None,
        }
    }

    pub fn as_blob_mut(&mut self) -> Option<&mut BlobNode> {
        match self {
            Self::Blob(b) => Some(b),
            Self::Tree(_) => None,
        }
    }

    /// Only assets can be selected in a tree view
    pub fn selectable(&self) -> bool {
        self.kind() == NodeKind::Blob
    }

    /// Only directories can be expanded in a tree view
    pub fn expandable(&self) -> bool {
        self.kind() == NodeKind::Tree
    }
}

/// Count nodes in a forest, directories included
pub fn count_nodes(tree: &[TreeNode]) -> usize {
    tree.iter()
        .map(|n| 1 + count_nodes(n.children()))
        .sum()
}

/// Look up a node by a `/`-separated path of names relative to `tree`.
///
/// Intermediate segments must name directories. The final segment matches
/// the first sibling with that name. An empty path matches nothing.
pub fn child_by_path<'a>(tree: &'a [TreeNode], path: &str) -> Option<&'a TreeNode> {
    let (parents, last) = match path.rsplit_once('/') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };
    if last.is_empty() {
        return None;
    }
    let mut level = tree;
    if let Some(parents) = parents {
        for segment in parents.split('/') {
            level = level
                .iter()
                .find(|n| n.kind() == NodeKind::Tree && n.name() == segment)?
                .children();
        }
    }
    level.iter().find(|n| n.name() == last)
}

/// Mutable lookup of an asset node by relative path
pub(crate) fn blob_by_path_mut<'a>(
    tree: &'a mut [TreeNode],
    path: &str,
) -> Option<&'a mut BlobNode> {
    match path.split_once('/') {
        Some((head, rest)) => tree.iter_mut().find_map(|n| match n {
            TreeNode::Tree(d) if d.name == head => blob_by_path_mut(&mut d.children, rest),
            _ => None,
        }),
        None => tree.iter_mut().find_map(|n| match n {
            TreeNode::Blob(b) if b.name == path => Some(b),
            _ => None,
        }),
    }
}
