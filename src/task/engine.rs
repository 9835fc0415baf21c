use super::create::CreateTaskRequest;
use super::types::{
    Task, TaskState, EVENT_ERROR, EVENT_INFO, EVENT_OUTPUT, EVENT_STATE, META_AI_OUTPUT,
    META_PARENT_WORKTREE_PATH, META_PR_URL,
};
use crate::config::FogConfig;
use crate::git::{WorktreeError, WorktreeProvisioner, WorktreeRequest};
use crate::notify::Notifier;
use crate::provider::{require_installed, ProviderError, ToolRegistry};
use crate::shared::{is_binary_available, ErrorKind, ProcessCommand};
use crate::store::{Repo, Store, StoreError};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

const DEFAULT_GH_BINARY: &str = "gh";
const PR_TITLE_MAX_CHARS: usize = 72;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Tool(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("branch `{branch}` is already used by task {task_id} in {repo}")]
    BranchInUse {
        branch: String,
        task_id: Uuid,
        repo: String,
    },
    #[error("illegal task transition {from} -> {to}")]
    IllegalTransition { from: TaskState, to: TaskState },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::NotFound(_) => ErrorKind::Validation,
            EngineError::BranchInUse { .. } => ErrorKind::Conflict,
            EngineError::Tool(err) => err.kind(),
            EngineError::Store(err) => err.kind(),
            EngineError::IllegalTransition { .. } => ErrorKind::Store,
        }
    }
}

/// Why a step stopped the task. `Failed` ends the task in `FAILED`; `Store`
/// means the state itself could not be recorded.
enum StepError {
    Failed(String),
    Store(StoreError),
    Illegal { from: TaskState, to: TaskState },
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::Store(err)
    }
}

type StepResult<T> = Result<T, StepError>;

/// Creates task records and drives them through
/// `SETUP → AI_RUNNING → [VALIDATING] → [COMMITTED] → [PR_CREATED] → COMPLETED`.
///
/// Cheap to clone; every clone shares the same store and notifier.
#[derive(Clone)]
pub struct TaskEngine {
    store: Arc<Store>,
    tools: ToolRegistry,
    provisioner: WorktreeProvisioner,
    config: FogConfig,
    notifier: Arc<dyn Notifier>,
    gh_binary: String,
    env: BTreeMap<String, String>,
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("tools", &self.tools)
            .field("gh_binary", &self.gh_binary)
            .finish_non_exhaustive()
    }
}

/// What ingress layers need from the engine: persist a new task, then run
/// it in the background.
pub trait TaskLauncher: Send + Sync {
    fn submit(&self, request: CreateTaskRequest) -> Result<Task, EngineError>;
    fn launch(&self, task: Task);
}

impl TaskLauncher for TaskEngine {
    fn submit(&self, request: CreateTaskRequest) -> Result<Task, EngineError> {
        self.create_task(request)
    }

    fn launch(&self, task: Task) {
        self.spawn(task);
    }
}

impl TaskEngine {
    pub fn new(
        store: Arc<Store>,
        tools: ToolRegistry,
        provisioner: WorktreeProvisioner,
        config: FogConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            tools,
            provisioner,
            config,
            notifier,
            gh_binary: DEFAULT_GH_BINARY.to_string(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_gh_binary(mut self, binary: impl Into<String>) -> Self {
        self.gh_binary = binary.into();
        self
    }

    /// Extra environment for setup, validate and `gh` subprocesses.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provisioner(&self) -> &WorktreeProvisioner {
        &self.provisioner
    }

    pub fn config(&self) -> &FogConfig {
        &self.config
    }

    /// Runs `task` on its own thread; the handle yields the final record.
    pub fn spawn(&self, task: Task) -> thread::JoinHandle<Result<Task, EngineError>> {
        let engine = self.clone();
        thread::spawn(move || {
            let id = task.id;
            let result = engine.run(task);
            if let Err(err) = &result {
                tracing::error!(task_id = %id, error = %err, "task run aborted");
            }
            result
        })
    }

    pub fn run_by_id(&self, id: &Uuid) -> Result<Task, EngineError> {
        let task = self.store.get_task(id)?.ok_or(EngineError::NotFound(*id))?;
        self.run(task)
    }

    /// Drives the task to a terminal state and returns the final record.
    ///
    /// Step failures are not errors here: they end in `FAILED` and are
    /// returned as `Ok`. `Err` means the store could not record progress.
    pub fn run(&self, mut task: Task) -> Result<Task, EngineError> {
        if task.state.is_terminal() {
            return Ok(task);
        }
        tracing::info!(task_id = %task.id, branch = %task.branch, "task started");

        match self.run_steps(&mut task) {
            Ok(()) => Ok(task),
            Err(StepError::Failed(message)) => {
                self.fail(&mut task, &message)?;
                Ok(task)
            }
            Err(StepError::Illegal { from, to }) => {
                let message = format!("illegal task transition {from} -> {to}");
                self.fail(&mut task, &message)?;
                Err(EngineError::IllegalTransition { from, to })
            }
            Err(StepError::Store(err)) => {
                tracing::error!(task_id = %task.id, error = %err, "failed to persist task progress");
                if let Err(fail_err) = self.fail(&mut task, &err.to_string()) {
                    tracing::error!(task_id = %task.id, error = %fail_err, "failed to record task failure");
                }
                Err(EngineError::Store(err))
            }
        }
    }

    fn run_steps(&self, task: &mut Task) -> StepResult<()> {
        let repo = self
            .store
            .get_repo(task.repo_id)?
            .ok_or(StoreError::MissingRepo(task.repo_id))?;

        self.transition(task, TaskState::Setup)?;
        let worktree = self.setup(task, &repo)?;

        self.transition(task, TaskState::AiRunning)?;
        self.run_ai(task, &worktree)?;

        if task.options.validate {
            let command = task.options.validate_cmd.trim().to_string();
            if command.is_empty() {
                self.event(task, EVENT_INFO, "validation requested without a validate command; skipped");
            } else {
                self.transition(task, TaskState::Validating)?;
                self.run_shell(task, "validate", &command, &worktree)?;
            }
        }

        let mut committed = false;
        if task.options.commit {
            self.transition(task, TaskState::Committed)?;
            committed = self.commit(task, &worktree)?;
        }

        if task.options.create_pr {
            if self.has_branch_changes(task, &worktree, committed) {
                self.transition(task, TaskState::PrCreated)?;
                self.create_pr(task, &worktree)?;
            } else {
                self.event(task, EVENT_INFO, "branch has no changes; pull request skipped");
            }
        }

        task.completed_at = Some(Utc::now());
        self.transition(task, TaskState::Completed)?;
        tracing::info!(task_id = %task.id, branch = %task.branch, "task completed");
        self.notify(task);
        Ok(())
    }

    /// Persists the new state, then records the transition event. The row is
    /// always written before the step's side effect runs.
    fn transition(&self, task: &mut Task, next: TaskState) -> StepResult<()> {
        let from = task.state;
        if !from.can_transition_to(next) {
            return Err(StepError::Illegal { from, to: next });
        }
        task.state = next;
        task.updated_at = Utc::now();
        self.store.save_task(task)?;
        self.store.append_event(
            &task.id,
            EVENT_STATE,
            next.as_str(),
            Some(&json!({ "from": from, "to": next })),
        )?;
        tracing::debug!(task_id = %task.id, state = %next, "task state changed");
        Ok(())
    }

    fn event(&self, task: &Task, kind: &str, message: &str) {
        if let Err(err) = self.store.append_event(&task.id, kind, message, None) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to append task event");
        }
    }

    fn setup(&self, task: &mut Task, repo: &Repo) -> StepResult<PathBuf> {
        let parent_worktree = task
            .meta(META_PARENT_WORKTREE_PATH)
            .map(PathBuf::from)
            .filter(|path| path.is_dir());
        let source = parent_worktree.as_deref().unwrap_or(&repo.base_path);

        let worktree = self
            .provisioner
            .provision(&WorktreeRequest {
                source,
                layout_root: &repo.base_path,
                name: &task.branch,
                branch: &task.branch,
                base_branch: &task.options.base_branch,
            })
            .map_err(|err: WorktreeError| {
                StepError::Failed(format!("worktree provisioning failed: {err}"))
            })?;

        task.worktree_path = Some(worktree.clone());
        task.updated_at = Utc::now();
        self.store.save_task(task)?;
        self.event(
            task,
            EVENT_INFO,
            &format!("worktree ready at {}", worktree.display()),
        );

        let setup_cmd = task.options.setup_cmd.trim().to_string();
        if !setup_cmd.is_empty() {
            self.run_shell(task, "setup", &setup_cmd, &worktree)?;
        }
        Ok(worktree)
    }

    fn run_ai(&self, task: &mut Task, worktree: &Path) -> StepResult<()> {
        let Some(tool) = self.tools.get(&task.ai_tool) else {
            return Err(StepError::Failed(format!(
                "AI tool `{}` is not registered",
                task.ai_tool
            )));
        };
        require_installed(tool.as_ref()).map_err(|err| StepError::Failed(err.to_string()))?;

        let outcome = tool
            .execute(worktree, &task.prompt, task.model.as_deref())
            .map_err(|err| StepError::Failed(err.to_string()))?;

        task.metadata
            .insert(META_AI_OUTPUT.to_string(), outcome.output.clone());
        task.updated_at = Utc::now();
        self.store.save_task(task)?;
        self.event(task, EVENT_OUTPUT, &outcome.output);

        if !outcome.success {
            return Err(StepError::Failed(format!(
                "AI tool `{}` failed: {}",
                task.ai_tool, outcome.output
            )));
        }
        Ok(())
    }

    fn run_shell(&self, task: &Task, label: &str, command: &str, worktree: &Path) -> StepResult<()> {
        self.event(task, EVENT_INFO, &format!("running {label} command: {command}"));
        let output = self
            .bounded_command("sh")
            .args(["-c", command])
            .current_dir(worktree)
            .envs(&self.env)
            .run()
            .map_err(|err| StepError::Failed(format!("{label} command could not start: {err}")))?;
        if !output.success() {
            let code = output
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(StepError::Failed(format!(
                "{label} command failed (exit {code}): {}",
                output.combined()
            )));
        }
        let combined = output.combined();
        if !combined.is_empty() {
            self.event(task, EVENT_OUTPUT, &combined);
        }
        Ok(())
    }

    /// Returns whether a commit was made. A clean worktree is a success.
    fn commit(&self, task: &Task, worktree: &Path) -> StepResult<bool> {
        let git = self.provisioner.git();
        let status = git
            .status_porcelain(worktree)
            .map_err(|err| StepError::Failed(err.to_string()))?;
        if status.trim().is_empty() {
            self.event(task, EVENT_INFO, "no changes to commit");
            return Ok(false);
        }
        git.add_all(worktree)
            .map_err(|err| StepError::Failed(err.to_string()))?;
        let message = commit_message(task);
        git.commit(worktree, &message)
            .map_err(|err| StepError::Failed(err.to_string()))?;
        self.event(task, EVENT_INFO, &format!("committed changes on {}", task.branch));
        Ok(true)
    }

    /// Whether the branch carries commits its base lacks, including any the
    /// AI tool made itself. Falls back to `committed` when git cannot tell.
    fn has_branch_changes(&self, task: &Task, worktree: &Path, committed: bool) -> bool {
        match self
            .provisioner
            .git()
            .commits_ahead(worktree, &task.options.base_branch, &task.branch)
        {
            Ok(ahead) => ahead > 0,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "could not compare branch with its base");
                committed
            }
        }
    }

    fn bounded_command(&self, program: &str) -> ProcessCommand {
        let command = ProcessCommand::new(program);
        match self.config.task_timeout() {
            Some(timeout) => command.timeout(timeout),
            None => command,
        }
    }

    fn create_pr(&self, task: &mut Task, worktree: &Path) -> StepResult<()> {
        if !is_binary_available(&self.gh_binary) {
            return Err(StepError::Failed(format!(
                "GitHub CLI `{}` is not installed; it is required to open pull requests",
                self.gh_binary
            )));
        }
        let token = self
            .store
            .github_token()
            .map_err(|err| StepError::Failed(err.to_string()))?;

        self.provisioner
            .git()
            .push(worktree, &task.branch, token.as_deref())
            .map_err(|err| {
                StepError::Failed(crate::git::redact_secret(
                    &format!("push failed: {err}"),
                    token.as_deref(),
                ))
            })?;

        let mut env = self.env.clone();
        if let Some(token) = &token {
            env.entry("GH_TOKEN".to_string())
                .or_insert_with(|| token.clone());
        }
        let output = self
            .bounded_command(&self.gh_binary)
            .args([
                "pr".to_string(),
                "create".to_string(),
                "--base".to_string(),
                task.options.base_branch.clone(),
                "--head".to_string(),
                task.branch.clone(),
                "--title".to_string(),
                pr_title(task),
                "--body".to_string(),
                pr_body(task),
            ])
            .current_dir(worktree)
            .envs(&env)
            .run()
            .map_err(|err| StepError::Failed(format!("gh pr create could not start: {err}")))?;
        if !output.success() {
            return Err(StepError::Failed(format!(
                "gh pr create failed: {}",
                output.combined()
            )));
        }

        let url = output.stdout.trim().to_string();
        task.metadata.insert(META_PR_URL.to_string(), url.clone());
        task.updated_at = Utc::now();
        self.store.save_task(task)?;
        self.event(task, EVENT_INFO, &format!("pull request opened: {url}"));
        Ok(())
    }

    fn fail(&self, task: &mut Task, message: &str) -> Result<(), EngineError> {
        if task.state.is_terminal() {
            return Ok(());
        }
        let from = task.state;
        task.state = TaskState::Failed;
        task.error = Some(message.to_string());
        let now = Utc::now();
        task.updated_at = now;
        task.completed_at = Some(now);
        self.store.save_task(task)?;
        self.store.append_event(
            &task.id,
            EVENT_STATE,
            TaskState::Failed.as_str(),
            Some(&json!({ "from": from, "to": TaskState::Failed })),
        )?;
        self.store.append_event(&task.id, EVENT_ERROR, message, None)?;
        tracing::warn!(task_id = %task.id, branch = %task.branch, state = %from, error = message, "task failed");
        self.notify(task);
        Ok(())
    }

    fn notify(&self, task: &Task) {
        if let Err(err) = self.notifier.task_finished(task) {
            tracing::warn!(task_id = %task.id, error = %err, "task notification failed");
            self.event(task, EVENT_INFO, &format!("notification failed: {err}"));
        }
    }
}

pub fn commit_message(task: &Task) -> String {
    let custom = task.options.commit_msg.trim();
    if custom.is_empty() {
        format!("feat: {}\n\nGenerated by Fog AI task {}", task.prompt.trim(), task.id)
    } else {
        custom.to_string()
    }
}

pub fn pr_title(task: &Task) -> String {
    let custom = task.options.pr_title.trim();
    if !custom.is_empty() {
        return custom.to_string();
    }
    let first_line = task.prompt.lines().next().unwrap_or_default().trim();
    let mut title: String = first_line.chars().take(PR_TITLE_MAX_CHARS).collect();
    if first_line.chars().count() > PR_TITLE_MAX_CHARS {
        title.push('…');
    }
    if title.is_empty() {
        format!("Fog task {}", task.short_id())
    } else {
        title
    }
}

pub fn pr_body(task: &Task) -> String {
    format!(
        "{}\n\n---\nGenerated by Fog AI task {} using `{}`.",
        task.prompt.trim(),
        task.id,
        task.ai_tool
    )
}
