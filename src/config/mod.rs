use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub mod error;
pub mod paths;

pub use error::ConfigError;
pub use paths::{normalize_lexically, FogPaths, FOG_HOME_ENV};

pub const DEFAULT_WORKTREE_DIR: &str = "../worktrees";
pub const DEFAULT_BASE_BRANCH: &str = "main";
pub const DEFAULT_BRANCH_PREFIX: &str = "fog/";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlackMode {
    Http,
    #[default]
    Socket,
}

impl std::str::FromStr for SlackMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "socket" => Ok(Self::Socket),
            other => Err(format!("unknown slack mode `{other}`; expected http or socket")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackFileConfig {
    pub mode: SlackMode,
    pub signing_secret: Option<String>,
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
}

/// Optional `$FOG_HOME/config.yaml`. Every field has a default, so a missing
/// file is equivalent to an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    /// Relative paths resolve against the repository root handed to the
    /// provisioner; absolute paths are used verbatim.
    pub worktree_dir: String,
    pub default_base_branch: String,
    pub branch_prefix: String,
    pub http_port: u16,
    /// Limit for the AI tool and the setup, validate and `gh` commands of a
    /// task. `0` disables it.
    pub task_timeout_secs: u64,
    /// Limit for each git invocation. `0` disables it.
    pub git_timeout_secs: u64,
    pub slack: SlackFileConfig,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            worktree_dir: DEFAULT_WORKTREE_DIR.to_string(),
            default_base_branch: DEFAULT_BASE_BRANCH.to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            slack: SlackFileConfig::default(),
        }
    }
}

impl FogConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(paths: &FogPaths) -> Result<Self, ConfigError> {
        Self::from_path(&paths.config_path())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.task_timeout_secs)
    }

    pub fn git_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.git_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worktree_dir.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "worktree_dir must be non-empty".to_string(),
            ));
        }
        if self.default_base_branch.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_base_branch must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = FogConfig::from_path(&dir.path().join("config.yaml")).expect("load");
        assert_eq!(config, FogConfig::default());
        assert_eq!(config.worktree_dir, "../worktrees");
    }

    #[test]
    fn partial_yaml_overrides_only_given_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "worktree_dir: /tmp/fog-worktrees\nslack:\n  mode: http\n  signing_secret: s3cr3t\n",
        )
        .expect("write");
        let config = FogConfig::from_path(&path).expect("load");
        assert_eq!(config.worktree_dir, "/tmp/fog-worktrees");
        assert_eq!(config.default_base_branch, "main");
        assert_eq!(config.slack.mode, SlackMode::Http);
        assert_eq!(config.slack.signing_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn zero_timeouts_disable_the_limit() {
        let config: FogConfig =
            serde_yaml::from_str("task_timeout_secs: 0\ngit_timeout_secs: 45\n").expect("parse");
        assert_eq!(config.task_timeout(), None);
        assert_eq!(config.git_timeout(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn empty_worktree_dir_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "worktree_dir: ''\n").expect("write");
        assert!(matches!(
            FogConfig::from_path(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
