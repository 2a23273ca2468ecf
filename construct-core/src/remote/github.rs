//! HTTP client for the GitHub REST API

use super::{Blob, Branch, Repository, RepositoryApi, Tree};
use crate::error::ConstructError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

pub struct GithubClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GithubClient {
    pub fn new(base_url: &str, token: Option<String>, user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ConstructError::RemoteApi {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    fn get(&self, url: &str, accept: &str) -> RequestBuilder {
        let req = self.client.get(url).header(ACCEPT, accept);
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, resource: &str) -> crate::Result<Response> {
        let resp = req.send().await.map_err(|e| ConstructError::RemoteApi {
            status: None,
            message: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(api_error(status, &body, resource))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, resource: &str) -> crate::Result<T> {
        let resp = self.send(self.get(url, JSON_MEDIA_TYPE), resource).await?;
        let status = resp.status();
        resp.json::<T>().await.map_err(|e| ConstructError::RemoteApi {
            status: Some(status.as_u16()),
            message: format!("unexpected {} response: {}", resource, e),
        })
    }

    /// Check the configured token against `GET /user`.
    ///
    /// `Ok(false)` means the API rejected the credentials.
    pub async fn verify_token(&self) -> crate::Result<bool> {
        let url = format!("{}/user", self.base_url);
        match self.send(self.get(&url, JSON_MEDIA_TYPE), "user").await {
            Ok(_) => Ok(true),
            Err(ConstructError::RemoteApi {
                status: Some(401), ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Map a non-success response to an error, keeping the API's own message
fn api_error(status: StatusCode, body: &str, resource: &str) -> ConstructError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| format!("HTTP {} from API", status));

    if status == StatusCode::NOT_FOUND {
        ConstructError::NotFound {
            resource: resource.to_string(),
            message,
        }
    } else {
        ConstructError::RemoteApi {
            status: Some(status.as_u16()),
            message,
        }
    }
}

#[async_trait]
impl RepositoryApi for GithubClient {
    async fn repository(&self, full_name: &str) -> crate::Result<Repository> {
        let url = format!("{}/repos/{}", self.base_url, full_name);
        self.get_json(&url, "repository").await
    }

    async fn branch(&self, full_name: &str, branch: &str) -> crate::Result<Branch> {
        let url = format!("{}/repos/{}/branches/{}", self.base_url, full_name, branch);
        self.get_json(&url, "branch").await
    }

    async fn tree(&self, full_name: &str, tree_sha: &str) -> crate::Result<Tree> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.base_url, full_name, tree_sha
        );
        let tree: Tree = self.get_json(&url, "tree").await?;
        if tree.truncated {
            tracing::warn!(repo = full_name, sha = tree_sha, "tree listing truncated by the API");
        }
        Ok(tree)
    }

    async fn blob(&self, url: &str) -> crate::Result<Blob> {
        self.get_json(url, "blob").await
    }

    async fn raw_blob(&self, url: &str) -> crate::Result<Vec<u8>> {
        let resp = self.send(self.get(url, RAW_MEDIA_TYPE), "blob").await?;
        let bytes = resp.bytes().await.map_err(|e| ConstructError::RemoteApi {
            status: None,
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn owner_repositories(&self, owner: &str) -> crate::Result<Vec<Repository>> {
        let url = format!("{}/users/{}/repos?per_page=100", self.base_url, owner);
        self.get_json(&url, "owner").await
    }
}
