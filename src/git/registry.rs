use super::{basic_header, bearer_header, redact_secret, strings, GitError, GitRunner};
use crate::config::FogPaths;
use crate::github::basic_auth_credential;
use crate::shared::{ErrorKind, RepoName};
use crate::store::{NewRepo, Repo, Store, StoreError};
use std::fs;
use std::path::Path;

pub const GITHUB_CLONE_BASE_ENV: &str = "FOG_GITHUB_CLONE_BASE";
const DEFAULT_GITHUB_CLONE_BASE: &str = "https://github.com";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid repository: {0}")]
    InvalidName(String),
    #[error("repository path {path} escapes the managed repos root")]
    OutsideRoot { path: String },
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bare clone of {url} failed after {attempts} attempt(s): {source}")]
    Clone {
        url: String,
        attempts: usize,
        #[source]
        source: GitError,
    },
    #[error("failed to attach base working copy at {path}: {source}")]
    BaseWorktree {
        path: String,
        #[source]
        source: GitError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidName(_) | RegistryError::OutsideRoot { .. } => {
                ErrorKind::Validation
            }
            RegistryError::Store(err) => err.kind(),
            RegistryError::Clone { source, .. } | RegistryError::BaseWorktree { source, .. } => {
                match source.kind() {
                    ErrorKind::Config => ErrorKind::Config,
                    _ => ErrorKind::SubprocessFailure,
                }
            }
            RegistryError::CreateDir { .. } => ErrorKind::Store,
        }
    }
}

/// Makes sure `bare_path` holds a bare mirror of `clone_url` and `base_path`
/// a working copy attached to it at `default_branch`. Existing paths are left
/// untouched. An empty `default_branch` means the mirror's `HEAD`; the branch
/// actually used is returned.
///
/// With a token the clone is tried first with a Bearer header and, on any
/// failure, once more with `Basic base64("x-access-token:<token>")`. The token
/// only ever travels as a per-invocation `-c http.extraHeader`.
pub fn ensure_initialised(
    git: &GitRunner,
    token: Option<&str>,
    clone_url: &str,
    bare_path: &Path,
    base_path: &Path,
    default_branch: &str,
) -> Result<String, RegistryError> {
    let token = token.map(str::trim).filter(|value| !value.is_empty());

    if !bare_path.exists() {
        if let Some(parent) = bare_path.parent() {
            fs::create_dir_all(parent).map_err(|source| RegistryError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        clone_bare(git, token, clone_url, bare_path)?;
    }

    let default_branch = match default_branch.trim() {
        "" => mirror_head(git, bare_path)?,
        branch => branch.to_string(),
    };

    if !base_path.exists() {
        let args = strings(&[
            "worktree",
            "add",
            &base_path.display().to_string(),
            &default_branch,
        ]);
        git.run(Some(bare_path), &args)
            .map_err(|source| RegistryError::BaseWorktree {
                path: base_path.display().to_string(),
                source: scrub(source, token),
            })?;
        tracing::info!(base = %base_path.display(), branch = %default_branch, "base working copy attached");
    }
    Ok(default_branch)
}

/// Branch the bare mirror's `HEAD` points at, i.e. the remote default.
fn mirror_head(git: &GitRunner, bare_path: &Path) -> Result<String, RegistryError> {
    let head = git
        .run(Some(bare_path), &strings(&["symbolic-ref", "--short", "HEAD"]))
        .map_err(|source| RegistryError::BaseWorktree {
            path: bare_path.display().to_string(),
            source,
        })?;
    let branch = head.trim().to_string();
    if branch.is_empty() {
        return Err(RegistryError::InvalidName(format!(
            "{} has no default branch",
            bare_path.display()
        )));
    }
    Ok(branch)
}

fn clone_bare(
    git: &GitRunner,
    token: Option<&str>,
    clone_url: &str,
    bare_path: &Path,
) -> Result<(), RegistryError> {
    let headers: Vec<Option<String>> = match token {
        Some(token) => vec![Some(bearer_header(token)), Some(basic_header(token))],
        None => vec![None],
    };
    let target = bare_path.display().to_string();

    let mut last_error = None;
    for (attempt, header) in headers.iter().enumerate() {
        let mut args = Vec::new();
        if let Some(header) = header {
            args.push("-c".to_string());
            args.push(header.clone());
        }
        args.extend(strings(&["clone", "--bare", clone_url, &target]));

        match git.run(None, &args) {
            Ok(_) => {
                tracing::info!(url = clone_url, bare = %target, attempt = attempt + 1, "bare mirror cloned");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(url = clone_url, attempt = attempt + 1, error = %scrub_message(&err, token), "bare clone attempt failed");
                if bare_path.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(bare_path) {
                        tracing::warn!(bare = %target, error = %cleanup, "failed to remove partial bare mirror");
                    }
                }
                last_error = Some(scrub(err, token));
            }
        }
    }

    Err(RegistryError::Clone {
        url: clone_url.to_string(),
        attempts: headers.len(),
        source: last_error.unwrap_or_else(|| GitError::Failed {
            args: "clone --bare".to_string(),
            code: "unknown".to_string(),
            output: String::new(),
        }),
    })
}

/// Removes the raw token and its Basic-auth encoding.
fn redact_token(text: &str, token: Option<&str>) -> String {
    let text = redact_secret(text, token);
    let basic = token.map(basic_auth_credential);
    redact_secret(&text, basic.as_deref())
}

fn scrub_message(err: &GitError, token: Option<&str>) -> String {
    redact_token(&err.to_string(), token)
}

/// Git sometimes echoes the remote URL or header back on stderr.
fn scrub(err: GitError, token: Option<&str>) -> GitError {
    match err {
        GitError::Failed { args, code, output } => GitError::Failed {
            args,
            code,
            output: redact_token(&output, token),
        },
        other => other,
    }
}

/// Hostname of an HTTPS or scp-style clone URL; `local` for filesystem paths.
pub fn host_from_url(url: &str) -> String {
    let trimmed = url.trim();
    if let Some((_, rest)) = trimmed.split_once("://") {
        let authority = rest.split('/').next().unwrap_or_default();
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        if !host.is_empty() {
            return host.to_string();
        }
    } else if let Some((user_host, _)) = trimmed.split_once(':') {
        if let Some((_, host)) = user_host.split_once('@') {
            return host.to_string();
        }
    }
    "local".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoImport {
    pub name: RepoName,
    pub clone_url: String,
    pub default_branch: String,
}

impl RepoImport {
    /// Clone URL under `FOG_GITHUB_CLONE_BASE` (default `https://github.com`).
    /// An empty `default_branch` is resolved from the mirror after cloning.
    pub fn github(name: RepoName, default_branch: impl Into<String>) -> Self {
        let base = std::env::var(GITHUB_CLONE_BASE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_CLONE_BASE.to_string());
        let clone_url = format!("{}/{}.git", base.trim_end_matches('/'), name.full_name());
        Self {
            name,
            clone_url,
            default_branch: default_branch.into(),
        }
    }
}

/// Owns `$FOG_HOME/repos/<owner>/<name>/{repo.git,base}`.
#[derive(Debug, Clone)]
pub struct RepoRegistry {
    paths: FogPaths,
    git: GitRunner,
}

impl RepoRegistry {
    pub fn new(paths: FogPaths, git: GitRunner) -> Self {
        Self { paths, git }
    }

    pub fn paths(&self) -> &FogPaths {
        &self.paths
    }

    /// Initialises the mirror (if needed) and upserts the repo row by name.
    pub fn import(&self, store: &Store, import: &RepoImport) -> Result<Repo, RegistryError> {
        let owner = import.name.owner();
        let name = import.name.name();
        let bare_path = self.paths.bare_path(owner, name);
        let base_path = self.paths.base_path(owner, name);

        let root = self.paths.repos_root();
        for path in [&bare_path, &base_path] {
            if !path.is_absolute() || !path.starts_with(&root) {
                return Err(RegistryError::OutsideRoot {
                    path: path.display().to_string(),
                });
            }
        }
        let token = store.github_token()?;
        let default_branch = ensure_initialised(
            &self.git,
            token.as_deref(),
            &import.clone_url,
            &bare_path,
            &base_path,
            &import.default_branch,
        )?;

        let repo = store.upsert_repo(&NewRepo {
            name: import.name.full_name(),
            url: import.clone_url.clone(),
            host: host_from_url(&import.clone_url),
            owner: owner.to_string(),
            repo: name.to_string(),
            bare_path,
            base_path,
            default_branch,
        })?;
        tracing::info!(repo = %repo.name, id = repo.id, "repository registered");
        Ok(repo)
    }
}
