use super::engine::{EngineError, TaskEngine};
use super::types::{
    Task, TaskOptions, TaskState, EVENT_STATE, META_MODEL, META_PARENT_BRANCH, META_PARENT_TASK_ID,
    META_PARENT_WORKTREE_PATH, META_SLACK_CHANNEL_ID, META_SLACK_RESPONSE_URL,
};
use crate::config::normalize_lexically;
use crate::shared::{validate_branch_name, RepoName};
use crate::store::{Repo, SETTING_BRANCH_PREFIX, SETTING_DEFAULT_TOOL};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The task a follow-up forks from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub task_id: Uuid,
    pub branch: String,
    pub worktree_path: Option<PathBuf>,
}

impl ParentLink {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            branch: task.branch.clone(),
            worktree_path: task.worktree_path.clone(),
        }
    }
}

/// Shared by every ingress. The serialised fields are the HTTP body; the
/// rest is filled in by the CLI and Slack paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub ai_tool: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(skip)]
    pub cwd: Option<PathBuf>,
    #[serde(skip)]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    pub parent: Option<ParentLink>,
    /// Pre-allocated id, for callers that derive the branch name from it.
    #[serde(skip)]
    pub task_id: Option<Uuid>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

impl TaskEngine {
    /// Validates the request, resolves repo and tool, and persists a
    /// `CREATED` task. Nothing here touches git or runs a tool; every error
    /// is a validation or configuration error.
    pub fn create_task(&self, request: CreateTaskRequest) -> Result<Task, EngineError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(EngineError::Validation("prompt must be non-empty".to_string()));
        }
        let branch = request.branch.trim();
        validate_branch_name(branch).map_err(EngineError::Validation)?;

        let repo = self.resolve_repo(request.repo.as_deref(), request.cwd.as_deref())?;
        if let Some(existing) = self
            .store()
            .list_tasks_for_repo(repo.id)?
            .into_iter()
            .find(|task| task.branch == branch)
        {
            return Err(EngineError::BranchInUse {
                branch: branch.to_string(),
                task_id: existing.id,
                repo: repo.name,
            });
        }

        let default_tool = self.store().get_setting(SETTING_DEFAULT_TOOL)?;
        let tool = self
            .tools()
            .resolve_installed(request.ai_tool.as_deref(), default_tool.as_deref())?;

        let mut options = request.options;
        if options.create_pr {
            options.commit = true;
        }
        if let Some(parent) = &request.parent {
            options.base_branch = parent.branch.clone();
        } else if options.base_branch.trim().is_empty() {
            options.base_branch = if repo.default_branch.trim().is_empty() {
                self.config().default_base_branch.clone()
            } else {
                repo.default_branch.clone()
            };
        }
        let base = options.base_branch.trim().to_string();
        validate_branch_name(&base)
            .map_err(|err| EngineError::Validation(format!("base branch: {err}")))?;
        options.base_branch = base;

        let model = non_empty(request.model.as_deref()).map(str::to_string);
        let mut metadata = request.metadata;
        if let Some(model) = &model {
            metadata.insert(META_MODEL.to_string(), model.clone());
        }
        let slack_channel = options.slack_channel.trim();
        if !slack_channel.is_empty()
            && !metadata.contains_key(META_SLACK_CHANNEL_ID)
            && !metadata.contains_key(META_SLACK_RESPONSE_URL)
        {
            metadata.insert(META_SLACK_CHANNEL_ID.to_string(), slack_channel.to_string());
        }
        if let Some(parent) = &request.parent {
            metadata.insert(META_PARENT_TASK_ID.to_string(), parent.task_id.to_string());
            metadata.insert(META_PARENT_BRANCH.to_string(), parent.branch.clone());
            if let Some(path) = &parent.worktree_path {
                metadata.insert(
                    META_PARENT_WORKTREE_PATH.to_string(),
                    path.display().to_string(),
                );
            }
        }

        let now = Utc::now();
        let task = Task {
            id: request.task_id.unwrap_or_else(Uuid::new_v4),
            repo_id: repo.id,
            parent_id: request.parent.as_ref().map(|parent| parent.task_id),
            created_at: now,
            updated_at: now,
            completed_at: None,
            state: TaskState::Created,
            prompt: prompt.to_string(),
            ai_tool: tool.name().to_string(),
            model,
            branch: branch.to_string(),
            worktree_path: None,
            options,
            metadata,
            error: None,
        };
        self.store().save_task(&task)?;
        self.store().append_event(
            &task.id,
            EVENT_STATE,
            TaskState::Created.as_str(),
            Some(&json!({ "to": TaskState::Created, "repo": repo.name, "branch": task.branch })),
        )?;
        tracing::info!(task_id = %task.id, repo = %repo.name, branch = %task.branch, tool = %task.ai_tool, "task created");
        Ok(task)
    }

    /// Explicit `owner/name`, else the registered repo whose base copy or
    /// worktree root contains `cwd`, else the only registered repo.
    pub fn resolve_repo(
        &self,
        explicit: Option<&str>,
        cwd: Option<&Path>,
    ) -> Result<Repo, EngineError> {
        if let Some(raw) = non_empty(explicit) {
            let name = RepoName::parse(raw).map_err(EngineError::Validation)?;
            return self
                .store()
                .get_repo_by_name(&name.full_name())?
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "repository {name} is not registered; run `fog repos import --select {name}`"
                    ))
                });
        }

        let repos = self.store().list_repos()?;
        if let Some(cwd) = cwd {
            let cwd = normalize_lexically(cwd);
            if let Some(repo) = repos.iter().find(|repo| {
                cwd.starts_with(&repo.base_path)
                    || cwd.starts_with(self.provisioner().worktree_root(&repo.base_path))
            }) {
                return Ok(repo.clone());
            }
        }

        match repos.len() {
            0 => Err(EngineError::Validation(
                "no repositories registered; run `fog repos import` first".to_string(),
            )),
            1 => Ok(repos.into_iter().next().ok_or_else(|| {
                EngineError::Validation("no repositories registered".to_string())
            })?),
            _ => Err(EngineError::Validation(format!(
                "several repositories are registered ({}); choose one with --repo",
                repos
                    .iter()
                    .map(|repo| repo.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Stored `branch_prefix` setting, falling back to the config file.
    pub fn branch_prefix(&self) -> Result<String, EngineError> {
        Ok(self
            .store()
            .get_setting(SETTING_BRANCH_PREFIX)?
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.config().branch_prefix.clone()))
    }
}
