use crate::app::cli::SetupArgs;
use crate::app::command_support::{map_err, open_context};
use crate::provider::ToolRegistry;
use crate::store::SETTING_DEFAULT_TOOL;

/// Stores the token (encrypted) and the default tool. Without
/// `--default-tool` the first installed tool is picked when none is stored.
pub fn cmd_setup(args: &SetupArgs) -> Result<String, String> {
    let ctx = open_context()?;
    let tools = ToolRegistry::with_builtin_tools();

    let mut token_saved = false;
    if let Some(token) = args.token.as_deref().map(str::trim) {
        if token.is_empty() {
            return Err("--token must be non-empty".to_string());
        }
        ctx.store.save_github_token(token).map_err(map_err)?;
        token_saved = true;
    }

    let mut notes = Vec::new();
    let default_tool = match args.default_tool.as_deref() {
        Some(name) => {
            let tool = tools.resolve_installed(Some(name), None).map_err(map_err)?;
            ctx.store
                .set_setting(SETTING_DEFAULT_TOOL, tool.name())
                .map_err(map_err)?;
            Some(tool.name().to_string())
        }
        None => match ctx.store.get_setting(SETTING_DEFAULT_TOOL).map_err(map_err)? {
            Some(existing) => Some(existing),
            None => match tools.available().into_iter().next() {
                Some(detected) => {
                    ctx.store
                        .set_setting(SETTING_DEFAULT_TOOL, &detected)
                        .map_err(map_err)?;
                    Some(detected)
                }
                None => {
                    notes.push(format!(
                        "warning=no AI tool found on PATH (looked for {})",
                        tools.names().join(", ")
                    ));
                    None
                }
            },
        },
    };

    let has_token = ctx.store.has_github_token().map_err(map_err)?;
    if !has_token {
        notes.push("warning=no GitHub token stored; run `fog setup --token <pat>`".to_string());
    }
    tracing::info!(home = %ctx.paths.root.display(), token_saved, "setup complete");

    let mut lines = vec![
        "setup complete".to_string(),
        format!("fog_home={}", ctx.paths.root.display()),
        format!("token_saved={token_saved}"),
        format!("has_github_token={has_token}"),
        format!("default_tool={}", default_tool.unwrap_or_default()),
    ];
    lines.extend(notes);
    Ok(lines.join("\n"))
}
