use super::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

pub const FOG_HOME_ENV: &str = "FOG_HOME";
pub const DEFAULT_HOME_DIR: &str = ".fog";
pub const DB_FILE_NAME: &str = "fog.db";
pub const MASTER_KEY_FILE_NAME: &str = "master.key";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// On-disk layout rooted at `$FOG_HOME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FogPaths {
    pub root: PathBuf,
}

impl FogPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$FOG_HOME` when set and non-empty, otherwise `~/.fog`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(home) = std::env::var_os(FOG_HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(absolutize(Path::new(&home))));
        }
        let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
        Ok(Self::new(PathBuf::from(home).join(DEFAULT_HOME_DIR)))
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE_NAME)
    }

    pub fn master_key_path(&self) -> PathBuf {
        self.root.join(MASTER_KEY_FILE_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn repos_root(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn repo_dir(&self, owner: &str, name: &str) -> PathBuf {
        self.repos_root().join(owner).join(name)
    }

    pub fn bare_path(&self, owner: &str, name: &str) -> PathBuf {
        self.repo_dir(owner, name).join("repo.git")
    }

    pub fn base_path(&self, owner: &str, name: &str) -> PathBuf {
        self.repo_dir(owner, name).join("base")
    }

    pub fn bootstrap(&self) -> Result<(), ConfigError> {
        for path in [self.root.clone(), self.repos_root()] {
            fs::create_dir_all(&path).map_err(|source| ConfigError::CreateDir {
                path: path.display().to_string(),
                source,
            })?;
        }
        restrict_dir_permissions(&self.root);
        Ok(())
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
        tracing::warn!(path = %path.display(), error = %err, "failed to restrict fog home permissions");
    }
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) {}

/// Resolves `.` and `..` without touching the filesystem, so paths built from
/// `<base>/../worktrees` compare cleanly against their root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
