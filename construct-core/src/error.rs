//! Error types for construct operations

use serde::Serialize;

/// Structured error payload for machine-readable output.
///
/// Emitted by the CLI in `--json` mode so front-ends can branch on `code`.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

impl From<&ConstructError> for ErrorEnvelope {
    fn from(err: &ConstructError) -> Self {
        let hint = match err {
            ConstructError::NotFound { .. } => "Check the owner/repo name and branch",
            ConstructError::InvalidPath(_) => "Check the subpath in the repository spec",
            ConstructError::RemoteApi {
                status: Some(401), ..
            } => "Check that the access token is valid",
            ConstructError::RemoteApi {
                status: Some(403), ..
            } => "The API rate limit may be exhausted, retry later",
            ConstructError::RemoteApi { .. } => "Check network connectivity",
            ConstructError::DuplicateSource(_) => "Remove the repeated repository from the collection",
            ConstructError::InvalidRepoSpec(_) => "Use <owner>/<repo>[/<path>][#<branch>]",
            ConstructError::Database(_) | ConstructError::Cache(_) => {
                "Run 'construct cache clear' to reset the cache"
            }
            _ => "",
        };
        Self::new(err.code(), err.to_string(), hint)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConstructError {
    #[error("{resource} not found: {message}")]
    NotFound { resource: String, message: String },

    #[error("Invalid repository path: {0}")]
    InvalidPath(String),

    #[error("Remote API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    RemoteApi { status: Option<u16>, message: String },

    #[error("Malformed side-car {url}: {message}")]
    MalformedSideCar { url: String, message: String },

    #[error("Repository merged twice into the same collection: {0}")]
    DuplicateSource(String),

    #[error("Invalid repository spec: {0}")]
    InvalidRepoSpec(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConstructError {
    /// Stable snake_case identifier for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidPath(_) => "invalid_path",
            Self::RemoteApi { .. } => "remote_api_error",
            Self::MalformedSideCar { .. } => "malformed_side_car",
            Self::DuplicateSource(_) => "duplicate_source",
            Self::InvalidRepoSpec(_) => "invalid_repo_spec",
            Self::Database(_) => "database_error",
            Self::Cache(_) => "cache_error",
            Self::Io(_) => "io_error",
            Self::ConfigParse(_) => "config_parse_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Whether this error only affects the repository that raised it.
    ///
    /// Sibling repositories in the same collection keep synchronizing.
    pub fn is_repository_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::RemoteApi { .. }
                | Self::InvalidPath(_)
                | Self::MalformedSideCar { .. }
        )
    }
}
