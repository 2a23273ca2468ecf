//! Collections: the named roots a user browses

use crate::node::{count_nodes, TreeNode};
use crate::repo_spec::RepositorySpec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Progress of a collection's most recent reload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Explicit list of repositories merged into one tree
    Repo,
    /// Every repository of a user or organization, one member each
    Org,
}

/// Stable id derived from a collection name.
///
/// Ids prefix every node id, so they must survive restarts.
pub fn collection_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub kind: CollectionKind,
    #[serde(default)]
    pub repositories: Vec<RepositorySpec>,
    /// Owner listed by an `Org` collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    /// Repository new models are committed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_to: Option<RepositorySpec>,
    #[serde(default)]
    pub load_state: LoadState,
    /// Merged tree of a `Repo` collection
    #[serde(default)]
    pub children: Vec<TreeNode>,
    /// One `Repo` collection per repository of an `Org` collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Collection>,
}

impl Collection {
    pub fn repo(name: impl Into<String>, repositories: Vec<RepositorySpec>) -> Self {
        let name = name.into();
        Self {
            id: collection_id(&name),
            name,
            kind: CollectionKind::Repo,
            repositories,
            org: None,
            upload_to: None,
            load_state: LoadState::Unloaded,
            children: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn org(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: collection_id(&name),
            name,
            kind: CollectionKind::Org,
            repositories: Vec::new(),
            org: Some(owner.into()),
            upload_to: None,
            load_state: LoadState::Unloaded,
            children: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn with_upload_to(mut self, upload_to: RepositorySpec) -> Self {
        self.upload_to = Some(upload_to);
        self
    }

    /// Find this collection or one of its members by id
    pub fn find(&self, id: &str) -> Option<&Collection> {
        if self.id == id {
            return Some(self);
        }
        self.members.iter().find(|m| m.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Collection> {
        if self.id == id {
            return Some(self);
        }
        self.members.iter_mut().find(|m| m.id == id)
    }

    /// Nodes below this collection, members included
    pub fn node_count(&self) -> usize {
        count_nodes(&self.children) + self.members.iter().map(Collection::node_count).sum::<usize>()
    }

    /// Copy suitable for persisting: trees are dropped since every reload
    /// rebuilds them, member collections are kept without their trees.
    pub fn to_persisted(&self) -> Collection {
        Collection {
            load_state: LoadState::Unloaded,
            children: Vec::new(),
            members: self.members.iter().map(Collection::to_persisted).collect(),
            ..self.clone()
        }
    }
}

/// Find a collection, or a member of an `Org` collection, by id
pub fn find_collection<'a>(collections: &'a [Collection], id: &str) -> Option<&'a Collection> {
    collections.iter().find_map(|c| c.find(id))
}

pub fn find_collection_mut<'a>(
    collections: &'a mut [Collection],
    id: &str,
) -> Option<&'a mut Collection> {
    collections.iter_mut().find_map(|c| c.find_mut(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_id_stable() {
        assert_eq!(collection_id("Fasteners"), collection_id("Fasteners"));
        assert_ne!(collection_id("Fasteners"), collection_id("Brackets"));
        assert_eq!(collection_id("Fasteners").len(), 16);
    }

    #[test]
    fn test_find_includes_org_members() {
        let mut org = Collection::org("Acme", "acme");
        org.members.push(Collection::repo("acme/parts", vec![RepositorySpec::new("acme", "parts")]));
        let member_id = collection_id("acme/parts");
        let collections = vec![Collection::repo("Other", vec![]), org];

        let found = find_collection(&collections, &member_id).unwrap();
        assert_eq!(found.name, "acme/parts");
        assert!(find_collection(&collections, "nope").is_none());
    }

    #[test]
    fn test_to_persisted_drops_trees() {
        let mut org = Collection::org("Acme", "acme");
        let mut member = Collection::repo("acme/parts", vec![]);
        member.load_state = LoadState::Loaded;
        member.children = vec![TreeNode::Tree(crate::node::DirNode {
            id: "x|a".into(),
            name: "a".into(),
            path: "a".into(),
            sources: vec![],
            children: vec![],
        })];
        org.members.push(member);
        org.load_state = LoadState::Loaded;

        let persisted = org.to_persisted();
        assert_eq!(persisted.load_state, LoadState::Unloaded);
        assert_eq!(persisted.members.len(), 1);
        assert!(persisted.members[0].children.is_empty());
        assert_eq!(org.node_count(), 1);

        let json = serde_json::to_value(&persisted).unwrap();
        assert_eq!(json["kind"], "org");
        assert_eq!(json["load_state"], "unloaded");
    }
}
