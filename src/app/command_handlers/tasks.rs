use crate::app::cli::{ListArgs, RunArgs, StatusArgs};
use crate::app::command_support::{
    build_engine, map_err, open_context, render_event, render_json, render_task, CliContext,
};
use crate::config::FOG_HOME_ENV;
use crate::notify::NotificationRouter;
use crate::task::{CreateTaskRequest, Task, TaskOptions, TaskState};
use serde_json::json;
use std::process::{Command, Stdio};
use std::sync::Arc;
use uuid::Uuid;

fn trimmed(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

pub fn request_from_args(args: &RunArgs) -> CreateTaskRequest {
    CreateTaskRequest {
        repo: args.repo.clone(),
        branch: args.branch.clone(),
        prompt: args.prompt.clone(),
        ai_tool: args.tool.clone(),
        model: args.model.clone(),
        options: TaskOptions {
            commit: args.commit,
            create_pr: args.pr,
            validate: args.validate,
            async_mode: args.async_mode,
            base_branch: trimmed(&args.base),
            setup_cmd: trimmed(&args.setup_cmd),
            validate_cmd: trimmed(&args.validate_cmd),
            commit_msg: trimmed(&args.commit_msg),
            pr_title: trimmed(&args.pr_title),
            ..TaskOptions::default()
        },
        cwd: std::env::current_dir().ok(),
        ..CreateTaskRequest::default()
    }
}

/// A `FAILED` run is reported as an error so the exit code reflects it.
fn finish(task: &Task) -> Result<String, String> {
    let rendered = render_task(task);
    if task.state == TaskState::Failed {
        return Err(format!(
            "task {} failed: {}\n{rendered}",
            task.id,
            task.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(rendered)
}

pub fn cmd_run(args: &RunArgs) -> Result<String, String> {
    let ctx = open_context()?;
    let engine = build_engine(&ctx, Arc::new(NotificationRouter::desktop_only()));
    let task = engine.create_task(request_from_args(args)).map_err(map_err)?;

    if args.async_mode {
        let pid = spawn_executor(&ctx, &task.id)?;
        tracing::info!(task_id = %task.id, pid, "task handed to background executor");
        return Ok(format!("{}\nexecutor_pid={pid}", render_task(&task)));
    }

    let finished = engine.run(task).map_err(map_err)?;
    finish(&finished)
}

/// Re-invokes this binary with the hidden `__execute` verb, detached from
/// the terminal.
fn spawn_executor(ctx: &CliContext, id: &Uuid) -> Result<u32, String> {
    let exe = std::env::current_exe().map_err(|err| format!("cannot locate fog binary: {err}"))?;
    let child = Command::new(exe)
        .arg("__execute")
        .arg(id.to_string())
        .env(FOG_HOME_ENV, &ctx.paths.root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| format!("failed to start background executor: {err}"))?;
    Ok(child.id())
}

pub fn cmd_execute(raw_id: &str) -> Result<String, String> {
    let id = Uuid::parse_str(raw_id.trim()).map_err(|err| format!("invalid task id: {err}"))?;
    let ctx = open_context()?;
    let engine = build_engine(&ctx, Arc::new(NotificationRouter::desktop_only()));
    let finished = engine.run_by_id(&id).map_err(map_err)?;
    finish(&finished)
}

pub fn cmd_list(args: &ListArgs) -> Result<String, String> {
    let ctx = open_context()?;
    let tasks = ctx.store.list_tasks(args.limit).map_err(map_err)?;
    if args.json {
        return render_json(&tasks);
    }
    if tasks.is_empty() {
        return Ok("no tasks".to_string());
    }
    Ok(tasks
        .iter()
        .map(|task| {
            format!(
                "{}  {:<10}  {:<30}  {:<8}  {}",
                task.short_id(),
                task.state,
                task.branch,
                task.ai_tool,
                task.created_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Full UUID, or a prefix of the hyphen-free form that matches one task.
fn find_task(ctx: &CliContext, raw: &str) -> Result<Task, String> {
    let raw = raw.trim();
    if let Ok(id) = Uuid::parse_str(raw) {
        return ctx
            .store
            .get_task(&id)
            .map_err(map_err)?
            .ok_or_else(|| format!("task {id} not found"));
    }
    let prefix = raw.replace('-', "").to_ascii_lowercase();
    if prefix.is_empty() {
        return Err("task id must be non-empty".to_string());
    }
    let mut matches: Vec<Task> = ctx
        .store
        .list_tasks(None)
        .map_err(map_err)?
        .into_iter()
        .filter(|task| task.id.simple().to_string().starts_with(&prefix))
        .collect();
    match matches.len() {
        0 => Err(format!("task {raw} not found")),
        1 => Ok(matches.remove(0)),
        count => Err(format!("task id prefix {raw} is ambiguous ({count} matches)")),
    }
}

pub fn cmd_status(args: &StatusArgs) -> Result<String, String> {
    let ctx = open_context()?;
    let task = find_task(&ctx, &args.task_id)?;
    let events = ctx.store.list_task_events(&task.id).map_err(map_err)?;
    if args.json {
        return render_json(&json!({ "task": task, "events": events }));
    }
    let mut out = render_task(&task);
    if !events.is_empty() {
        out.push_str("\nevents:");
        for event in &events {
            out.push_str("\n  ");
            out.push_str(&render_event(event));
        }
    }
    Ok(out)
}
