//! Configuration for construct

use crate::collection::Collection;
use crate::error::ConstructError;
use crate::remote::DEFAULT_API_URL;
use crate::repo_spec::RepositorySpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Construct Configuration

[remote]
# Base URL of the GitHub REST API
api_url = "https://api.github.com"
# Environment variable holding the access token
token_env = "GITHUB_TOKEN"
user_agent = "construct"

[cache]
# SQLite database holding tree, metadata and blob snapshots
path = ".construct/cache.db"
# Entries not read within this window are evicted (e.g., "12h", "30d")
evict_after = "30d"

[sync]
# Download side-car metadata after merging trees
index = true

# Collections merge repositories into one tree:
#
# [[collections]]
# name = "Fasteners"
# repositories = "acme/hardware/fasteners, acme/community#main"
# upload_to = "acme/hardware"
#
# Or list every repository of an owner:
#
# [[collections]]
# name = "Acme"
# org = "acme"
"#;

/// Construct configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_evict_after")]
    pub evict_after: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_index")]
    pub index: bool,
}

/// One `[[collections]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// Spec strings, comma or whitespace separated
    #[serde(default)]
    pub repositories: Option<String>,
    /// Owner whose repositories form the collection
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub upload_to: Option<String>,
}

// Default value functions
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_user_agent() -> String {
    "construct".to_string()
}
fn default_cache_path() -> PathBuf {
    PathBuf::from(".construct/cache.db")
}
fn default_evict_after() -> String {
    "30d".to_string()
}
fn default_index() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            evict_after: default_evict_after(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            index: default_index(),
        }
    }
}

impl CollectionConfig {
    /// Build the collection this table describes.
    ///
    /// Exactly one of `repositories` and `org` must be set.
    pub fn to_collection(&self) -> crate::Result<Collection> {
        let collection = match (&self.repositories, &self.org) {
            (Some(specs), None) => Collection::repo(&self.name, RepositorySpec::parse_list(specs)?),
            (None, Some(owner)) => Collection::org(&self.name, owner),
            _ => {
                return Err(ConstructError::ConfigParse(format!(
                    "collection '{}' must set exactly one of 'repositories' or 'org'",
                    self.name
                )))
            }
        };
        match &self.upload_to {
            Some(spec) => Ok(collection.with_upload_to(RepositorySpec::parse(spec)?)),
            None => Ok(collection),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| ConstructError::ConfigParse(e.to_string()))
    }

    /// Eviction window as Duration
    pub fn evict_after(&self) -> Duration {
        parse_duration(&self.cache.evict_after).unwrap_or(Duration::from_secs(30 * 86400))
    }

    /// Token from the environment variable named by `remote.token_env`
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.remote.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    /// All configured collections, validated
    pub fn collections(&self) -> crate::Result<Vec<Collection>> {
        let collections: Vec<Collection> = self
            .collections
            .iter()
            .map(CollectionConfig::to_collection)
            .collect::<crate::Result<_>>()?;

        for (i, c) in collections.iter().enumerate() {
            if collections[..i].iter().any(|prev| prev.id == c.id) {
                return Err(ConstructError::ConfigParse(format!(
                    "duplicate collection name '{}'",
                    c.name
                )));
            }
        }
        Ok(collections)
    }
}

/// Parse duration string (e.g., "1h", "30m", "1d")
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (idx, unit) = s.char_indices().last()?;
    let num: u64 = s[..idx].parse().ok()?;

    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return None,
    };
    num.checked_mul(scale).map(Duration::from_secs)
}
