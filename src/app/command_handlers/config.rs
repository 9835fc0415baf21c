use crate::app::cli::ConfigSetArgs;
use crate::app::command_support::{map_err, open_context, render_json};
use crate::provider::ToolRegistry;
use crate::shared::validate_branch_name;
use crate::store::{SETTING_BRANCH_PREFIX, SETTING_CLOUD_URL, SETTING_DEFAULT_TOOL};
use serde_json::json;
use std::collections::BTreeMap;

pub fn cmd_config_view(as_json: bool) -> Result<String, String> {
    let ctx = open_context()?;
    let settings: BTreeMap<String, String> = ctx
        .store
        .list_settings()
        .map_err(map_err)?
        .into_iter()
        .collect();
    let has_token = ctx.store.has_github_token().map_err(map_err)?;
    let tools = ToolRegistry::with_builtin_tools();

    if as_json {
        return render_json(&json!({
            "fog_home": ctx.paths.root,
            "config_file": ctx.paths.config_path(),
            "settings": settings,
            "has_github_token": has_token,
            "available_tools": tools.available(),
            "worktree_dir": ctx.config.worktree_dir,
            "default_base_branch": ctx.config.default_base_branch,
            "http_port": ctx.config.http_port,
            "task_timeout_secs": ctx.config.task_timeout_secs,
            "git_timeout_secs": ctx.config.git_timeout_secs,
        }));
    }

    let mut lines = vec![
        format!("fog_home={}", ctx.paths.root.display()),
        format!("config_file={}", ctx.paths.config_path().display()),
        format!("has_github_token={has_token}"),
        format!("available_tools={}", tools.available().join(",")),
        format!("worktree_dir={}", ctx.config.worktree_dir),
        format!("default_base_branch={}", ctx.config.default_base_branch),
        format!("http_port={}", ctx.config.http_port),
        format!("task_timeout_secs={}", ctx.config.task_timeout_secs),
        format!("git_timeout_secs={}", ctx.config.git_timeout_secs),
    ];
    for (key, value) in settings {
        lines.push(format!("setting.{key}={value}"));
    }
    Ok(lines.join("\n"))
}

pub fn cmd_config_set(args: &ConfigSetArgs) -> Result<String, String> {
    if args.default_tool.is_none() && args.branch_prefix.is_none() && args.cloud_url.is_none() {
        return Err(
            "nothing to set; pass --default-tool, --branch-prefix or --cloud-url".to_string(),
        );
    }
    let ctx = open_context()?;
    let mut lines = vec!["config updated".to_string()];

    if let Some(name) = &args.default_tool {
        let tool = ToolRegistry::with_builtin_tools()
            .resolve_installed(Some(name.as_str()), None)
            .map_err(map_err)?;
        ctx.store
            .set_setting(SETTING_DEFAULT_TOOL, tool.name())
            .map_err(map_err)?;
        lines.push(format!("{SETTING_DEFAULT_TOOL}={}", tool.name()));
    }
    if let Some(prefix) = &args.branch_prefix {
        let prefix = prefix.trim();
        validate_branch_name(&format!("{prefix}x"))
            .map_err(|err| format!("invalid branch prefix `{prefix}`: {err}"))?;
        ctx.store
            .set_setting(SETTING_BRANCH_PREFIX, prefix)
            .map_err(map_err)?;
        lines.push(format!("{SETTING_BRANCH_PREFIX}={prefix}"));
    }
    if let Some(url) = &args.cloud_url {
        let url = url.trim();
        if url.is_empty() {
            return Err("--cloud-url must be non-empty".to_string());
        }
        ctx.store
            .set_setting(SETTING_CLOUD_URL, url)
            .map_err(map_err)?;
        lines.push(format!("{SETTING_CLOUD_URL}={url}"));
    }
    Ok(lines.join("\n"))
}
