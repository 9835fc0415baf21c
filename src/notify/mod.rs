//! Terminal-state notifications: Slack for Slack-origin tasks, a desktop
//! notification for everything else. One call per terminal transition, no
//! retries.

use crate::channels::slack::{SlackError, SlackPoster};
use crate::task::{Task, TaskState, META_SLACK_CHANNEL_ID, META_SLACK_RESPONSE_URL, META_SLACK_ROOT_TS};
use std::sync::Arc;

pub mod desktop;

pub use desktop::DesktopNotifier;

pub const TITLE_COMPLETE: &str = "Fog Task Complete";
pub const TITLE_FAILED: &str = "Fog Task Failed";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("slack notification failed: {0}")]
    Slack(#[from] SlackError),
    #[error("desktop notification failed: {0}")]
    Desktop(String),
    #[error("task {0} originated in Slack but no Slack client is configured")]
    SlackUnavailable(String),
}

pub trait Notifier: Send + Sync {
    fn task_finished(&self, task: &Task) -> Result<(), NotifyError>;
}

/// Drops every notification; for one-shot CLI paths that print the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn task_finished(&self, _task: &Task) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// `1h 2m`, `3m 4s`, `5s`.
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn starting_message(branch: &str) -> String {
    format!("🚀 Starting task on branch {branch}")
}

pub fn completion_message(task: &Task) -> String {
    let finished = task.completed_at.unwrap_or(task.updated_at);
    let mut message = format!(
        "✅ Task completed: {} ({})",
        task.branch,
        format_duration(finished - task.created_at)
    );
    if let Some(url) = task.pr_url() {
        message.push_str(&format!("\nPR: {url}"));
    }
    message
}

pub fn failure_message(task: &Task) -> String {
    format!(
        "❌ Task failed: {}\n{}",
        task.branch,
        task.error.as_deref().unwrap_or("unknown error")
    )
}

pub fn terminal_message(task: &Task) -> Option<(&'static str, String)> {
    match task.state {
        TaskState::Completed => Some((TITLE_COMPLETE, completion_message(task))),
        TaskState::Failed => Some((TITLE_FAILED, failure_message(task))),
        _ => None,
    }
}

/// Picks the channel from the task's origin metadata.
pub struct NotificationRouter {
    slack: Option<Arc<dyn SlackPoster>>,
    desktop: Arc<dyn Notifier>,
}

impl NotificationRouter {
    pub fn new(slack: Option<Arc<dyn SlackPoster>>, desktop: Arc<dyn Notifier>) -> Self {
        Self { slack, desktop }
    }

    pub fn desktop_only() -> Self {
        Self::new(None, Arc::new(DesktopNotifier::new()))
    }
}

impl Notifier for NotificationRouter {
    fn task_finished(&self, task: &Task) -> Result<(), NotifyError> {
        let Some((_, message)) = terminal_message(task) else {
            return Ok(());
        };
        if !task.is_slack_origin() {
            return self.desktop.task_finished(task);
        }
        let Some(slack) = &self.slack else {
            return Err(NotifyError::SlackUnavailable(task.id.to_string()));
        };
        if let Some(response_url) = task.meta(META_SLACK_RESPONSE_URL) {
            slack.post_response(response_url, &message, false)?;
            return Ok(());
        }
        match (task.meta(META_SLACK_CHANNEL_ID), task.meta(META_SLACK_ROOT_TS)) {
            (Some(channel), Some(root_ts)) => {
                slack.post_thread(channel, root_ts, &message)?;
                Ok(())
            }
            (Some(channel), None) => {
                slack.post_message(channel, &message)?;
                Ok(())
            }
            _ => Err(NotifyError::SlackUnavailable(task.id.to_string())),
        }
    }
}
