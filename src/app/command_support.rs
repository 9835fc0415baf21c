use crate::config::{FogConfig, FogPaths};
use crate::git::{GitRunner, WorktreeProvisioner};
use crate::notify::Notifier;
use crate::provider::ToolRegistry;
use crate::store::Store;
use crate::task::{Task, TaskEngine, TaskEvent};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;

/// Everything a command needs: resolved home, user config and the store.
pub struct CliContext {
    pub paths: FogPaths,
    pub config: FogConfig,
    pub store: Arc<Store>,
}

pub fn map_err<E: Display>(err: E) -> String {
    err.to_string()
}

pub fn open_context() -> Result<CliContext, String> {
    let paths = FogPaths::from_env().map_err(map_err)?;
    paths.bootstrap().map_err(map_err)?;
    let config = FogConfig::load(&paths).map_err(map_err)?;
    let store = Store::open(&paths).map_err(map_err)?;
    Ok(CliContext {
        paths,
        config,
        store: Arc::new(store),
    })
}

/// Git runner bounded by the configured per-invocation timeout.
pub fn git_runner(config: &FogConfig) -> GitRunner {
    match config.git_timeout() {
        Some(timeout) => GitRunner::new().with_timeout(timeout),
        None => GitRunner::new(),
    }
}

pub fn build_engine(ctx: &CliContext, notifier: Arc<dyn Notifier>) -> TaskEngine {
    let provisioner =
        WorktreeProvisioner::new(git_runner(&ctx.config), ctx.config.worktree_dir.clone());
    TaskEngine::new(
        Arc::clone(&ctx.store),
        ToolRegistry::builtin(ctx.config.task_timeout()),
        provisioner,
        ctx.config.clone(),
        notifier,
    )
}

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|err| format!("failed to encode json: {err}"))
}

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

/// `key=value` lines, one field per line.
pub fn render_task(task: &Task) -> String {
    let mut lines = vec![
        format!("task_id={}", task.id),
        format!("state={}", task.state),
        format!("branch={}", task.branch),
        format!("base_branch={}", task.options.base_branch),
        format!("ai_tool={}", task.ai_tool),
        format!("model={}", opt(task.model.as_deref())),
        format!(
            "worktree_path={}",
            task.worktree_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default()
        ),
        format!("commit={}", task.options.commit),
        format!("create_pr={}", task.options.create_pr),
        format!("pr_url={}", opt(task.pr_url())),
        format!("created_at={}", task.created_at.to_rfc3339()),
    ];
    if let Some(completed) = task.completed_at {
        lines.push(format!("completed_at={}", completed.to_rfc3339()));
    }
    if let Some(parent) = task.parent_id {
        lines.push(format!("parent_task_id={parent}"));
    }
    if let Some(error) = &task.error {
        lines.push(format!("error={}", error.replace('\n', " ")));
    }
    lines.join("\n")
}

pub fn render_event(event: &TaskEvent) -> String {
    let first_line = event.message.lines().next().unwrap_or_default();
    format!(
        "{} [{}] {}",
        event.ts.format("%Y-%m-%d %H:%M:%S"),
        event.kind,
        first_line
    )
}
