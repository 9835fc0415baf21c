//! GitHub REST access used by repository discovery, plus the Basic-auth
//! credential shared with the clone fallback.

use crate::shared::ErrorKind;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_API_BASE_ENV: &str = "FOG_GITHUB_API_BASE";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("GitHub rejected the token (HTTP {status}); re-run `fog setup --token`")]
    Unauthorized { status: u16 },
    #[error("GitHub API {url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("GitHub API request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("GitHub API response from {url} was not valid JSON: {message}")]
    Decode { url: String, message: String },
}

impl GitHubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitHubError::Unauthorized { .. } => ErrorKind::Config,
            _ => ErrorKind::TransientExternal,
        }
    }
}

/// `base64("x-access-token:<token>")`.
pub fn basic_auth_credential(token: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("x-access-token:{token}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOwner {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepo {
    pub full_name: String,
    pub name: String,
    pub owner: RemoteOwner,
    pub clone_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl RemoteRepo {
    pub fn default_branch_or(&self, fallback: &str) -> String {
        self.default_branch
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    agent: ureq::Agent,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        let api_base = std::env::var(GITHUB_API_BASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_BASE.to_string());
        Self::with_api_base(token, api_base)
    }

    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    /// Every repository the token can see, following pagination.
    pub fn list_user_repos(&self) -> Result<Vec<RemoteRepo>, GitHubError> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = self.endpoint(&format!("user/repos?per_page={PAGE_SIZE}&page={page}"));
            let batch: Vec<RemoteRepo> = self.get_json(&url)?;
            let done = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if done {
                break;
            }
        }
        all.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(all)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, GitHubError> {
        let response = self
            .agent
            .get(url)
            .set("Authorization", &format!("Bearer {}", self.token.trim()))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", concat!("fog/", env!("CARGO_PKG_VERSION")))
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(status @ (401 | 403), _) => {
                    GitHubError::Unauthorized { status }
                }
                ureq::Error::Status(status, response) => GitHubError::Status {
                    url: url.to_string(),
                    status,
                    body: response.into_string().unwrap_or_default(),
                },
                other => GitHubError::Transport {
                    url: url.to_string(),
                    message: other.to_string(),
                },
            })?;
        response.into_json::<T>().map_err(|err| GitHubError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}
