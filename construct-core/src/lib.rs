//! Construct Core - Git tree synchronization and merge engine
//!
//! Turns a set of remote Git repositories holding 3D-model assets into one
//! merged, metadata-enriched tree per collection, caching every step by
//! content hash so repeated loads are cheap.

pub mod builder;
pub mod cache;
pub mod collection;
pub mod config;
pub mod content_type;
pub mod error;
pub mod merge;
pub mod meta;
pub mod node;
pub mod prune;
pub mod remote;
pub mod repo_spec;
pub mod snapshot;
pub mod subtree;
pub mod sync;

pub use builder::{build_tree, BuildContext};
pub use cache::{CachePort, InMemoryCache, SharedCache, SqliteCache};
pub use collection::{collection_id, find_collection, Collection, CollectionKind, LoadState};
pub use config::Config;
pub use content_type::{classify, ContentType};
pub use error::{ConstructError, ErrorEnvelope};
pub use merge::{merge_trees, TreeMerger};
pub use meta::{merge_keywords, IndexStats, MetadataIndexer};
pub use node::{child_by_path, count_nodes, BlobNode, ContentTypeEntry, DirNode, MetaRecord, NodeKind, TreeNode};
pub use prune::{finalize, prune, sort};
pub use remote::{GithubClient, InMemoryRemote, RepositoryApi, SharedApi};
pub use repo_spec::{resolve_spec, RepositorySpec};
pub use snapshot::{SnapshotStore, TreeSnapshot};
pub use subtree::extract;
pub use sync::{ReloadReport, RepoFailure, SyncOptions, SyncOutcome, Synchronizer};

/// Result type alias for construct operations
pub type Result<T> = std::result::Result<T, ConstructError>;
