//! Task records, their creation from ingress requests, and the engine that
//! drives them to a terminal state.

pub mod create;
pub mod engine;
pub mod types;

pub use create::{CreateTaskRequest, ParentLink};
pub use engine::{commit_message, pr_body, pr_title, EngineError, TaskEngine, TaskLauncher};
pub use types::{
    Task, TaskEvent, TaskOptions, TaskState, EVENT_ERROR, EVENT_INFO, EVENT_OUTPUT, EVENT_STATE,
    META_AI_OUTPUT, META_MODEL, META_PARENT_BRANCH, META_PARENT_TASK_ID,
    META_PARENT_WORKTREE_PATH, META_PR_URL, META_SLACK_CHANNEL_ID, META_SLACK_RESPONSE_URL,
    META_SLACK_ROOT_TS,
};
