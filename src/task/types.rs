use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

pub const META_PR_URL: &str = "pr_url";
pub const META_SLACK_CHANNEL_ID: &str = "slack_channel_id";
pub const META_SLACK_ROOT_TS: &str = "slack_root_ts";
pub const META_SLACK_RESPONSE_URL: &str = "slack_response_url";
pub const META_PARENT_TASK_ID: &str = "parent_task_id";
pub const META_PARENT_BRANCH: &str = "parent_branch";
pub const META_PARENT_WORKTREE_PATH: &str = "parent_worktree_path";
pub const META_MODEL: &str = "model";
pub const META_AI_OUTPUT: &str = "ai_output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Setup,
    AiRunning,
    Validating,
    Committed,
    PrCreated,
    Completed,
    Failed,
}

impl TaskState {
    pub const TERMINAL: [TaskState; 2] = [TaskState::Completed, TaskState::Failed];

    fn rank(self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::Setup => 1,
            TaskState::AiRunning => 2,
            TaskState::Validating => 3,
            TaskState::Committed => 4,
            TaskState::PrCreated => 5,
            TaskState::Completed => 6,
            TaskState::Failed => 7,
        }
    }

    /// Forward along the canonical path (optional states may be skipped), or
    /// to `Failed` from anything non-terminal.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == TaskState::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::Setup => "SETUP",
            TaskState::AiRunning => "AI_RUNNING",
            TaskState::Validating => "VALIDATING",
            TaskState::Committed => "COMMITTED",
            TaskState::PrCreated => "PR_CREATED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATED" => Ok(TaskState::Created),
            "SETUP" => Ok(TaskState::Setup),
            "AI_RUNNING" => Ok(TaskState::AiRunning),
            "VALIDATING" => Ok(TaskState::Validating),
            "COMMITTED" => Ok(TaskState::Committed),
            "PR_CREATED" => Ok(TaskState::PrCreated),
            "COMPLETED" => Ok(TaskState::Completed),
            "FAILED" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state `{other}`")),
        }
    }
}

/// Per-task switches. Empty strings mean "not set", matching the JSON wire
/// shape where every field is a plain string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskOptions {
    pub commit: bool,
    #[serde(rename = "createPR")]
    pub create_pr: bool,
    pub validate: bool,
    #[serde(rename = "async")]
    pub async_mode: bool,
    pub base_branch: String,
    pub setup_cmd: String,
    pub validate_cmd: String,
    pub commit_msg: String,
    pub pr_title: String,
    pub slack_channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub repo_id: i64,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub state: TaskState,
    pub prompt: String,
    pub ai_tool: String,
    #[serde(default)]
    pub model: Option<String>,
    pub branch: String,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn pr_url(&self) -> Option<&str> {
        self.meta(META_PR_URL)
    }

    pub fn is_slack_origin(&self) -> bool {
        self.meta(META_SLACK_CHANNEL_ID).is_some() || self.meta(META_SLACK_RESPONSE_URL).is_some()
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string().chars().take(8).collect()
    }
}

pub const EVENT_STATE: &str = "state";
pub const EVENT_INFO: &str = "info";
pub const EVENT_OUTPUT: &str = "output";
pub const EVENT_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotone_along_canonical_path() {
        assert!(TaskState::Created.can_transition_to(TaskState::Setup));
        assert!(TaskState::Setup.can_transition_to(TaskState::AiRunning));
        assert!(TaskState::AiRunning.can_transition_to(TaskState::Committed));
        assert!(TaskState::AiRunning.can_transition_to(TaskState::Completed));
        assert!(TaskState::PrCreated.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Committed.can_transition_to(TaskState::Validating));
        assert!(!TaskState::Setup.can_transition_to(TaskState::Setup));
        assert!(!TaskState::AiRunning.can_transition_to(TaskState::Created));
    }

    #[test]
    fn failed_is_reachable_from_non_terminal_states_only() {
        for state in [
            TaskState::Created,
            TaskState::Setup,
            TaskState::AiRunning,
            TaskState::Validating,
            TaskState::Committed,
            TaskState::PrCreated,
        ] {
            assert!(state.can_transition_to(TaskState::Failed), "{state}");
        }
        assert!(!TaskState::Completed.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            TaskState::Created,
            TaskState::AiRunning,
            TaskState::PrCreated,
            TaskState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>(), Ok(state));
        }
        assert_eq!(
            serde_json::to_string(&TaskState::AiRunning).expect("json"),
            "\"AI_RUNNING\""
        );
    }

    #[test]
    fn options_use_wire_field_names() {
        let options: TaskOptions = serde_json::from_str(
            r#"{"commit":true,"createPR":true,"async":true,"baseBranch":"develop","setupCmd":"make deps"}"#,
        )
        .expect("parse");
        assert!(options.commit);
        assert!(options.create_pr);
        assert!(options.async_mode);
        assert!(!options.validate);
        assert_eq!(options.base_branch, "develop");
        assert_eq!(options.setup_cmd, "make deps");
    }
}
