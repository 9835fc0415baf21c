use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

const MAX_SLUG_WORDS: usize = 5;
const MAX_SLUG_CHARS: usize = 40;

fn is_repo_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-')
}

/// A GitHub-style `owner/name` repository identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(format!(
                "repository `{trimmed}` must have the form owner/name"
            ));
        };
        if !is_repo_segment(owner) || !is_repo_segment(name) {
            return Err(format!(
                "repository `{trimmed}` must use only ASCII letters, digits, '_', '.' or '-' in owner and name"
            ));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl Serialize for RepoName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RepoName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

/// Rejects names git would refuse (or that would escape the worktree root).
pub fn validate_branch_name(branch: &str) -> Result<(), String> {
    if branch.trim().is_empty() {
        return Err("branch must be non-empty".to_string());
    }
    if branch.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(format!("branch `{branch}` must not contain whitespace"));
    }
    if branch.starts_with('-') || branch.starts_with('/') || branch.ends_with('/') {
        return Err(format!(
            "branch `{branch}` must not start with '-' or '/' or end with '/'"
        ));
    }
    if branch.ends_with(".lock") || branch.ends_with('.') {
        return Err(format!("branch `{branch}` must not end with '.lock' or '.'"));
    }
    if branch.contains("..") || branch.contains("//") || branch.contains("@{") {
        return Err(format!(
            "branch `{branch}` must not contain '..', '//' or '@{{'"
        ));
    }
    if branch
        .chars()
        .any(|ch| matches!(ch, '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(format!(
            "branch `{branch}` must not contain any of ~ ^ : ? * [ \\"
        ));
    }
    if branch.split('/').any(|segment| segment.starts_with('.')) {
        return Err(format!(
            "branch `{branch}` must not have path segments starting with '.'"
        ));
    }
    Ok(())
}

/// Parses a comma separated list of 1-based indexes into distinct 0-based
/// positions, keeping the order of first appearance.
pub fn parse_indexes(raw: &str, max: usize) -> Result<Vec<usize>, String> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: usize = trimmed
            .parse()
            .map_err(|_| format!("`{trimmed}` is not a number"))?;
        if value == 0 || value > max {
            return Err(format!("index {value} is out of range 1..={max}"));
        }
        let index = value - 1;
        if !out.contains(&index) {
            out.push(index);
        }
    }
    if out.is_empty() {
        return Err("no indexes selected".to_string());
    }
    Ok(out)
}

fn slugify(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(MAX_SLUG_WORDS)
        .map(|word| word.to_ascii_lowercase())
        .collect();
    let mut slug = words.join("-");
    if slug.len() > MAX_SLUG_CHARS {
        slug.truncate(MAX_SLUG_CHARS);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Builds `<prefix><slug>-<6 hex>` where the suffix comes from the task id so
/// two tasks never share a branch (and therefore never share a worktree).
pub fn generate_branch_name(prefix: &str, prompt: &str, task_id: &Uuid) -> String {
    let suffix: String = task_id.simple().to_string().chars().take(6).collect();
    format!("{}{}-{}", prefix.trim(), slugify(prompt), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_accepts_owner_slash_name_and_trims() {
        let parsed = RepoName::parse("  acme/api.v2_x-y ").expect("parse");
        assert_eq!(parsed.owner(), "acme");
        assert_eq!(parsed.name(), "api.v2_x-y");
        assert_eq!(parsed.to_string(), "acme/api.v2_x-y");
    }

    #[test]
    fn repo_name_rejects_other_shapes() {
        for raw in [
            "",
            "acme",
            "acme/",
            "/api",
            "acme/api/extra",
            "acme/a pi",
            "ac me/api",
            "acme/api!",
            "../api",
            "acme/..",
            "https://github.com/acme/api",
        ] {
            assert!(RepoName::parse(raw).is_err(), "accepted `{raw}`");
        }
    }

    #[test]
    fn branch_validation_follows_git_ref_rules() {
        assert!(validate_branch_name("feature-otp").is_ok());
        assert!(validate_branch_name("fog/add-login-1a2b3c").is_ok());
        for bad in [
            "", " ", "a b", "-x", "x/", "/x", "a..b", "a.lock", "a~1", "a:b", "a@{1}", "x/.hidden",
        ] {
            assert!(validate_branch_name(bad).is_err(), "accepted `{bad}`");
        }
    }

    #[test]
    fn parse_indexes_dedups_and_converts_to_zero_based() {
        assert_eq!(parse_indexes("1, 2, 2, 3", 3).expect("parse"), vec![0, 1, 2]);
        assert_eq!(parse_indexes("3,1", 3).expect("parse"), vec![2, 0]);
        assert!(parse_indexes("0", 3).is_err());
        assert!(parse_indexes("4", 3).is_err());
        assert!(parse_indexes("x", 3).is_err());
        assert!(parse_indexes(" , ", 3).is_err());
    }

    #[test]
    fn generated_branch_uses_prefix_slug_and_id_suffix() {
        let id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").expect("uuid");
        assert_eq!(
            generate_branch_name("fog/", "Add login page, please!", &id),
            "fog/add-login-page-please-1a2b3c"
        );
        assert_eq!(generate_branch_name("fog/", "!!!", &id), "fog/task-1a2b3c");
        let branch = generate_branch_name("fog/", "Add login", &id);
        assert!(validate_branch_name(&branch).is_ok());
    }
}
