//! Repository spec strings: `<owner>/<repo>[/<subpath>][#<branch>]`

use crate::error::ConstructError;
use crate::remote::RepositoryApi;
use serde::{Deserialize, Serialize};

const GITHUB_WEB_PREFIX: &str = "https://github.com/";

/// A repository, an optional subtree root and an optional branch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub owner: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Defaults to the repository's default branch when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl RepositorySpec {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            path: None,
            branch: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// `owner/name` as used in API URLs
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Parse a single spec string.
    ///
    /// A leading `https://github.com/` is accepted. A subpath of `/` means the
    /// repository root.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        let rest = trimmed.strip_prefix(GITHUB_WEB_PREFIX).unwrap_or(trimmed);

        let (location, branch) = match rest.split_once('#') {
            Some((location, branch)) => (location, Some(branch)),
            None => (rest, None),
        };

        let mut segments = location.splitn(3, '/');
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() {
            return Err(ConstructError::InvalidRepoSpec(input.to_string()));
        }

        let path = segments
            .next()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(String::from);

        let branch = match branch {
            Some("") => return Err(ConstructError::InvalidRepoSpec(input.to_string())),
            Some(b) => Some(b.to_string()),
            None => None,
        };

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            path,
            branch,
        })
    }

    /// Parse a comma or whitespace separated list of specs
    pub fn parse_list(input: &str) -> crate::Result<Vec<Self>> {
        input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl std::fmt::Display for RepositorySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if let Some(path) = &self.path {
            write!(f, "/{}", path)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "#{}", branch)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RepositorySpec {
    type Err = ConstructError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalize a user-entered spec against the remote.
///
/// Confirms the repository exists, adopts its canonical `full_name` casing and
/// validates an explicit branch.
pub async fn resolve_spec(api: &dyn RepositoryApi, input: &str) -> crate::Result<RepositorySpec> {
    let spec = RepositorySpec::parse(input)?;
    let repo = api.repository(&spec.full_name()).await?;

    let (owner, name) = repo
        .full_name
        .split_once('/')
        .ok_or_else(|| ConstructError::InvalidRepoSpec(repo.full_name.clone()))?;

    let branch = match &spec.branch {
        Some(branch) => Some(api.branch(&repo.full_name, branch).await?.name),
        None => None,
    };

    Ok(RepositorySpec {
        owner: owner.to_string(),
        name: name.to_string(),
        path: spec.path,
        branch,
    })
}
