use super::{strings, GitError, GitRunner};
use crate::config::{normalize_lexically, DEFAULT_WORKTREE_DIR};
use crate::shared::{validate_branch_name, ErrorKind};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("worktree name must be non-empty")]
    EmptyName,
    #[error("invalid branch: {0}")]
    InvalidBranch(String),
    #[error("branch `{branch}` does not exist and no base branch was given")]
    MissingBaseBranch { branch: String },
    #[error("{path} is not a git repository")]
    NotARepository { path: String },
    #[error("worktree path {path} already exists")]
    PathExists { path: String },
    #[error("worktree path {path} escapes worktree root {root}")]
    OutsideRoot { path: String, root: String },
    #[error(transparent)]
    Git(#[from] GitError),
}

impl WorktreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorktreeError::Git(err) => err.kind(),
            WorktreeError::PathExists { .. } => ErrorKind::SubprocessFailure,
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeRequest<'a> {
    /// Repository (base copy or an existing task worktree) git runs in.
    pub source: &'a Path,
    /// Root the configured worktree directory is resolved against; normally
    /// the repo's base copy even when `source` is a parent task's worktree.
    pub layout_root: &'a Path,
    pub name: &'a str,
    pub branch: &'a str,
    pub base_branch: &'a str,
}

#[derive(Debug, Clone)]
pub struct WorktreeProvisioner {
    git: GitRunner,
    worktree_dir: String,
}

impl WorktreeProvisioner {
    pub fn new(git: GitRunner, worktree_dir: impl Into<String>) -> Self {
        let worktree_dir = worktree_dir.into();
        let worktree_dir = if worktree_dir.trim().is_empty() {
            DEFAULT_WORKTREE_DIR.to_string()
        } else {
            worktree_dir
        };
        Self { git, worktree_dir }
    }

    pub fn git(&self) -> &GitRunner {
        &self.git
    }

    /// `<layout_root>/<worktree_dir>` normalised, or `worktree_dir` itself
    /// when it is absolute.
    pub fn worktree_root(&self, layout_root: &Path) -> PathBuf {
        let dir = Path::new(self.worktree_dir.trim());
        if dir.is_absolute() {
            normalize_lexically(dir)
        } else {
            normalize_lexically(&layout_root.join(dir))
        }
    }

    pub fn target_path(&self, layout_root: &Path, name: &str) -> PathBuf {
        normalize_lexically(&self.worktree_root(layout_root).join(name))
    }

    /// Attaches a worktree for `branch`, creating the branch at `base_branch`
    /// when it does not exist yet. Returns the new worktree path.
    pub fn provision(&self, request: &WorktreeRequest<'_>) -> Result<PathBuf, WorktreeError> {
        if request.name.trim().is_empty() {
            return Err(WorktreeError::EmptyName);
        }
        validate_branch_name(request.branch).map_err(WorktreeError::InvalidBranch)?;
        if !self.git.is_repository(request.source) {
            return Err(WorktreeError::NotARepository {
                path: request.source.display().to_string(),
            });
        }

        let root = self.worktree_root(request.layout_root);
        let target = self.target_path(request.layout_root, request.name);
        if !target.starts_with(&root) || target == root {
            return Err(WorktreeError::OutsideRoot {
                path: target.display().to_string(),
                root: root.display().to_string(),
            });
        }
        if target.exists() {
            return Err(WorktreeError::PathExists {
                path: target.display().to_string(),
            });
        }

        let target_arg = target.display().to_string();
        let args = if self.git.branch_exists(request.source, request.branch)? {
            strings(&["worktree", "add", &target_arg, request.branch])
        } else {
            if request.base_branch.trim().is_empty() {
                return Err(WorktreeError::MissingBaseBranch {
                    branch: request.branch.to_string(),
                });
            }
            strings(&[
                "worktree",
                "add",
                "-b",
                request.branch,
                &target_arg,
                request.base_branch.trim(),
            ])
        };
        self.git.run(Some(request.source), &args)?;
        tracing::info!(branch = request.branch, path = %target.display(), "worktree provisioned");
        Ok(target)
    }
}
