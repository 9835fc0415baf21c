use crate::app::command_support::{git_runner, map_err, open_context, render_json, CliContext};
use crate::git::{RepoImport, RepoRegistry};
use crate::github::{GitHubClient, RemoteRepo};
use crate::shared::{parse_indexes, RepoName};
use std::io::{self, BufRead, Write};

fn discover(ctx: &CliContext) -> Result<Vec<RemoteRepo>, String> {
    let token = ctx
        .store
        .github_token()
        .map_err(map_err)?
        .ok_or_else(|| "no GitHub token stored; run `fog setup --token <pat>`".to_string())?;
    GitHubClient::new(token).list_user_repos().map_err(map_err)
}

pub fn render_discovery(remote: &[RemoteRepo]) -> String {
    remote
        .iter()
        .enumerate()
        .map(|(index, repo)| {
            format!(
                "{:>3}. {} ({}){}",
                index + 1,
                repo.full_name,
                repo.default_branch_or("?"),
                if repo.private { " private" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn cmd_discover(as_json: bool) -> Result<String, String> {
    let ctx = open_context()?;
    let remote = discover(&ctx)?;
    if as_json {
        return render_json(&remote);
    }
    if remote.is_empty() {
        return Ok("no repositories visible to the stored token".to_string());
    }
    Ok(render_discovery(&remote))
}

fn import_from_remote(remote: &RemoteRepo) -> Result<RepoImport, String> {
    let name = RepoName::parse(&remote.full_name)?;
    Ok(RepoImport {
        name,
        clone_url: remote.clone_url.clone(),
        default_branch: remote.default_branch_or(""),
    })
}

/// Turns `--select` into imports. Entries are `owner/name` or 1-based
/// indexes into the discovery list; `discover` is only called when an index
/// is present.
pub fn resolve_selection(
    raw: &str,
    discover: impl FnOnce() -> Result<Vec<RemoteRepo>, String>,
) -> Result<Vec<RepoImport>, String> {
    let items: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect();
    if items.is_empty() {
        return Err("no repositories selected".to_string());
    }

    let needs_listing = items
        .iter()
        .any(|item| item.chars().all(|ch| ch.is_ascii_digit()));
    let listing = if needs_listing { discover()? } else { Vec::new() };

    let mut imports: Vec<RepoImport> = Vec::new();
    for item in items {
        let import = if item.chars().all(|ch| ch.is_ascii_digit()) {
            let index = parse_indexes(item, listing.len())?;
            let remote = index
                .first()
                .and_then(|index| listing.get(*index))
                .ok_or_else(|| format!("index {item} is out of range"))?;
            import_from_remote(remote)?
        } else {
            let name = RepoName::parse(item)?;
            match listing
                .iter()
                .find(|remote| remote.full_name.eq_ignore_ascii_case(&name.full_name()))
            {
                Some(remote) => import_from_remote(remote)?,
                None => RepoImport::github(name, ""),
            }
        };
        if !imports.iter().any(|existing| existing.name == import.name) {
            imports.push(import);
        }
    }
    Ok(imports)
}

fn prompt_for_selection(remote: &[RemoteRepo]) -> Result<String, String> {
    if remote.is_empty() {
        return Err("no repositories visible to the stored token".to_string());
    }
    let mut stderr = io::stderr();
    writeln!(stderr, "{}", render_discovery(remote)).map_err(map_err)?;
    write!(stderr, "Select repositories to import (e.g. 1,3): ").map_err(map_err)?;
    stderr.flush().map_err(map_err)?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(map_err)?;
    Ok(line.trim().to_string())
}

pub fn cmd_import(select: Option<&str>) -> Result<String, String> {
    let ctx = open_context()?;
    let imports = match select {
        Some(raw) => resolve_selection(raw, || discover(&ctx))?,
        None => {
            let remote = discover(&ctx)?;
            let raw = prompt_for_selection(&remote)?;
            resolve_selection(&raw, || Ok(remote))?
        }
    };

    let registry = RepoRegistry::new(ctx.paths.clone(), git_runner(&ctx.config));
    let mut lines = Vec::new();
    for import in &imports {
        let repo = registry.import(&ctx.store, import).map_err(map_err)?;
        lines.push(format!(
            "imported={} default_branch={} base={}",
            repo.name,
            repo.default_branch,
            repo.base_path.display()
        ));
    }
    Ok(lines.join("\n"))
}

pub fn cmd_list() -> Result<String, String> {
    let ctx = open_context()?;
    let repos = ctx.store.list_repos().map_err(map_err)?;
    if repos.is_empty() {
        return Ok("no repositories registered; run `fog repos import`".to_string());
    }
    Ok(repos
        .iter()
        .map(|repo| {
            format!(
                "{} default_branch={} base={}",
                repo.name,
                repo.default_branch,
                repo.base_path.display()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
