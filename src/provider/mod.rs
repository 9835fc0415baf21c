//! AI coding tools: a capability trait, the built-in CLI adapters, and the
//! name → implementation registry tasks resolve against.

use crate::shared::{ErrorKind, ProcessError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub mod tools;

pub use tools::{CliTool, ToolKind};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown AI tool `{name}`; available: {}", list_or_none(.available))]
    UnknownTool { name: String, available: Vec<String> },
    #[error("no AI tool selected and no default_tool configured; available: {}", list_or_none(.available))]
    NoToolSelected { available: Vec<String> },
    #[error("AI tool `{name}` is not installed (binary `{binary}` not on PATH)")]
    NotInstalled { name: String, binary: String },
    #[error("AI tool `{name}` could not be run: {source}")]
    Process {
        name: String,
        #[source]
        source: ProcessError,
    },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Process { .. } => ErrorKind::SubprocessFailure,
            _ => ErrorKind::Config,
        }
    }
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none installed".to_string()
    } else {
        names.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
}

/// One AI coding tool. Implementations must be callable from any task thread.
pub trait AiTool: Send + Sync {
    fn name(&self) -> &str;
    fn binary(&self) -> &str;
    fn is_available(&self) -> bool;
    fn execute(
        &self,
        worktree: &Path,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ToolOutcome, ProviderError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn AiTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `claude`, `cursor` and `aider`, each invoked through its CLI.
    pub fn with_builtin_tools() -> Self {
        Self::builtin(None)
    }

    /// Built-in tools whose runs are killed after `timeout`.
    pub fn builtin(timeout: Option<Duration>) -> Self {
        let mut registry = Self::new();
        for kind in [ToolKind::Claude, ToolKind::Cursor, ToolKind::Aider] {
            let tool = CliTool::builtin(kind);
            let tool = match timeout {
                Some(timeout) => tool.with_timeout(timeout),
                None => tool,
            };
            registry.register(Arc::new(tool));
        }
        registry
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, tool: Arc<dyn AiTool>) {
        self.tools.insert(tool.name().to_ascii_lowercase(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AiTool>> {
        self.tools.get(&name.trim().to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Names of registered tools whose binary is present.
    pub fn available(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter(|(_, tool)| tool.is_available())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Explicit tool first, then the stored default. Never substitutes a
    /// different tool for the one asked for.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        default_tool: Option<&str>,
    ) -> Result<Arc<dyn AiTool>, ProviderError> {
        let requested = explicit
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| default_tool.map(str::trim).filter(|name| !name.is_empty()));
        let Some(name) = requested else {
            return Err(ProviderError::NoToolSelected {
                available: self.available(),
            });
        };
        self.get(name).ok_or_else(|| ProviderError::UnknownTool {
            name: name.to_string(),
            available: self.available(),
        })
    }

    /// [`resolve`](Self::resolve) plus a PATH presence check.
    pub fn resolve_installed(
        &self,
        explicit: Option<&str>,
        default_tool: Option<&str>,
    ) -> Result<Arc<dyn AiTool>, ProviderError> {
        let tool = self.resolve(explicit, default_tool)?;
        require_installed(tool.as_ref())?;
        Ok(tool)
    }
}

pub fn require_installed(tool: &dyn AiTool) -> Result<(), ProviderError> {
    if tool.is_available() {
        Ok(())
    } else {
        Err(ProviderError::NotInstalled {
            name: tool.name().to_string(),
            binary: tool.binary().to_string(),
        })
    }
}
