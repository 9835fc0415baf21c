use super::{AiTool, ProviderError, ToolOutcome};
use crate::shared::{is_binary_available, ProcessCommand};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Command-line flavour; decides how the prompt and model are passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Claude,
    Cursor,
    Aider,
}

impl ToolKind {
    pub fn default_name(self) -> &'static str {
        match self {
            ToolKind::Claude => "claude",
            ToolKind::Cursor => "cursor",
            ToolKind::Aider => "aider",
        }
    }

    pub fn default_binary(self) -> &'static str {
        match self {
            ToolKind::Claude => "claude",
            ToolKind::Cursor => "cursor-agent",
            ToolKind::Aider => "aider",
        }
    }

    fn build_args(self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let model = model.map(str::trim).filter(|value| !value.is_empty());
        let mut args = Vec::new();
        match self {
            ToolKind::Claude => {
                args.push("--dangerously-skip-permissions".to_string());
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.to_string());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
            }
            ToolKind::Cursor => {
                args.push("--force".to_string());
                args.push("--output-format".to_string());
                args.push("text".to_string());
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.to_string());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
            }
            ToolKind::Aider => {
                args.push("--yes-always".to_string());
                args.push("--no-auto-commits".to_string());
                args.push("--no-pretty".to_string());
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.to_string());
                }
                args.push("--message".to_string());
                args.push(prompt.to_string());
            }
        }
        args
    }
}

/// An AI tool driven through its CLI, run with the worktree as cwd.
#[derive(Debug, Clone)]
pub struct CliTool {
    name: String,
    binary: String,
    kind: ToolKind,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl CliTool {
    pub fn new(name: impl Into<String>, binary: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            kind,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn builtin(kind: ToolKind) -> Self {
        Self::new(kind.default_name(), kind.default_binary(), kind)
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn args_for(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        self.kind.build_args(prompt, model)
    }
}

impl AiTool for CliTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        is_binary_available(&self.binary)
    }

    fn execute(
        &self,
        worktree: &Path,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ToolOutcome, ProviderError> {
        let mut command = ProcessCommand::new(&self.binary)
            .args(self.args_for(prompt, model))
            .current_dir(worktree)
            .envs(&self.env);
        if let Some(timeout) = self.timeout {
            command = command.timeout(timeout);
        }
        tracing::info!(tool = %self.name, worktree = %worktree.display(), "invoking AI tool");
        let output = command.run().map_err(|source| ProviderError::Process {
            name: self.name.clone(),
            source,
        })?;
        Ok(ToolOutcome {
            success: output.success(),
            output: output.combined(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_args_put_prompt_last_and_model_when_given() {
        let tool = CliTool::builtin(ToolKind::Claude);
        assert_eq!(
            tool.args_for("Add OTP", Some("sonnet")),
            vec![
                "--dangerously-skip-permissions",
                "--model",
                "sonnet",
                "-p",
                "Add OTP"
            ]
        );
        assert!(!tool.args_for("x", Some(" ")).contains(&"--model".to_string()));
    }

    #[test]
    fn aider_passes_prompt_as_message_without_auto_commits() {
        let args = CliTool::builtin(ToolKind::Aider).args_for("Fix bug", None);
        assert!(args.contains(&"--no-auto-commits".to_string()));
        assert_eq!(&args[args.len() - 2..], &["--message", "Fix bug"]);
    }

    #[cfg(unix)]
    #[test]
    fn execute_runs_in_worktree_and_reports_exit_status() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let write_script = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).expect("write");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
            path.display().to_string()
        };
        let ok = write_script("fake-ai", "#!/bin/sh\npwd\necho \"prompt: $#\"\nexit 0\n");
        let broken = write_script("broken-ai", "#!/bin/sh\necho broken 1>&2\nexit 2\n");

        let tool = CliTool::new("fake", ok, ToolKind::Claude);
        assert!(tool.is_available());
        let outcome = tool.execute(dir.path(), "Do it", None).expect("execute");
        assert!(outcome.success);
        assert!(outcome.output.contains("prompt: 3"));

        let tool = CliTool::new("broken", broken, ToolKind::Claude);
        let outcome = tool.execute(dir.path(), "Do it", None).expect("execute");
        assert!(!outcome.success);
        assert_eq!(outcome.output, "broken");
    }
}
