//! Typed adapter over the `git` CLI plus the two layers built on it: the
//! bare-mirror registry and the per-task worktree provisioner.

use crate::shared::{ErrorKind, ProcessCommand, ProcessError, ProcessOutput};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub mod registry;
pub mod worktree;

pub use registry::{
    ensure_initialised, host_from_url, RegistryError, RepoImport, RepoRegistry,
    GITHUB_CLONE_BASE_ENV,
};
pub use worktree::{WorktreeError, WorktreeProvisioner, WorktreeRequest};

pub const REDACTED: &str = "[REDACTED]";
const AUTHORIZATION_MARKER: &str = "authorization:";

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {args}: {source}")]
    Process {
        args: String,
        #[source]
        source: ProcessError,
    },
    #[error("git {args} exited with {code}: {output}")]
    Failed {
        args: String,
        code: String,
        output: String,
    },
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitError::Process {
                source: ProcessError::NotFound { .. },
                ..
            } => ErrorKind::Config,
            _ => ErrorKind::SubprocessFailure,
        }
    }
}

/// Replaces the value of any `Authorization:` header in a git argument
/// vector with [`REDACTED`]. Applied before arguments reach a log line or an
/// error string.
pub fn sanitize_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            match arg.to_ascii_lowercase().find(AUTHORIZATION_MARKER) {
                Some(index) => {
                    let keep = index + AUTHORIZATION_MARKER.len();
                    format!("{} {REDACTED}", &arg[..keep])
                }
                None => arg.to_string(),
            }
        })
        .collect()
}

/// Removes every occurrence of `secret` from `text`.
pub fn redact_secret(text: &str, secret: Option<&str>) -> String {
    match secret.map(str::trim).filter(|value| !value.is_empty()) {
        Some(secret) => text.replace(secret, REDACTED),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct GitRunner {
    binary: String,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl Default for GitRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl GitRunner {
    pub fn new() -> Self {
        let mut env = BTreeMap::new();
        env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
        Self {
            binary: "git".to_string(),
            env,
            timeout: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Runs git and returns its output regardless of exit status.
    pub fn output(&self, cwd: Option<&Path>, args: &[String]) -> Result<ProcessOutput, GitError> {
        let shown = sanitize_args(args).join(" ");
        tracing::debug!(args = %shown, cwd = ?cwd, "running git");
        let mut command = ProcessCommand::new(&self.binary)
            .args(args.iter().cloned())
            .envs(&self.env);
        if let Some(cwd) = cwd {
            command = command.current_dir(cwd);
        }
        if let Some(timeout) = self.timeout {
            command = command.timeout(timeout);
        }
        command
            .run()
            .map_err(|source| GitError::Process { args: shown, source })
    }

    /// Runs git and fails on a non-zero exit, quoting sanitised arguments and
    /// combined output.
    pub fn run(&self, cwd: Option<&Path>, args: &[String]) -> Result<String, GitError> {
        let output = self.output(cwd, args)?;
        if output.success() {
            return Ok(output.stdout);
        }
        Err(GitError::Failed {
            args: sanitize_args(args).join(" "),
            code: output
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output: output.combined(),
        })
    }

    pub fn is_repository(&self, path: &Path) -> bool {
        if !path.is_dir() {
            return false;
        }
        self.output(Some(path), &strings(&["rev-parse", "--git-dir"]))
            .map(|output| output.success())
            .unwrap_or(false)
    }

    pub fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let output = self.output(
            Some(repo),
            &strings(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ]),
        )?;
        Ok(output.success())
    }

    pub fn status_porcelain(&self, worktree: &Path) -> Result<String, GitError> {
        self.run(Some(worktree), &strings(&["status", "--porcelain"]))
    }

    pub fn add_all(&self, worktree: &Path) -> Result<(), GitError> {
        self.run(Some(worktree), &strings(&["add", "-A"]))
            .map(|_| ())
    }

    pub fn commit(&self, worktree: &Path, message: &str) -> Result<(), GitError> {
        self.run(Some(worktree), &strings(&["commit", "-m", message]))
            .map(|_| ())
    }

    /// Number of commits on `branch` that `base` does not have.
    pub fn commits_ahead(&self, worktree: &Path, base: &str, branch: &str) -> Result<u64, GitError> {
        let range = format!("{base}..{branch}");
        let stdout = self.run(Some(worktree), &strings(&["rev-list", "--count", &range]))?;
        stdout.trim().parse().map_err(|_| GitError::Failed {
            args: format!("rev-list --count {range}"),
            code: "0".to_string(),
            output: format!("unexpected output `{}`", stdout.trim()),
        })
    }

    /// Pushes `branch` to `origin`, authenticating with a per-invocation
    /// header when a token is available.
    pub fn push(&self, worktree: &Path, branch: &str, token: Option<&str>) -> Result<(), GitError> {
        let mut args = Vec::new();
        if let Some(token) = token.filter(|value| !value.trim().is_empty()) {
            args.push("-c".to_string());
            args.push(bearer_header(token));
        }
        args.extend(strings(&["push", "-u", "origin", branch]));
        self.run(Some(worktree), &args).map(|_| ())
    }
}

pub(crate) fn bearer_header(token: &str) -> String {
    format!("http.extraHeader=Authorization: Bearer {}", token.trim())
}

pub(crate) fn basic_header(token: &str) -> String {
    format!(
        "http.extraHeader=Authorization: Basic {}",
        crate::github::basic_auth_credential(token.trim())
    )
}

pub(crate) fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}
