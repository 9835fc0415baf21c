use super::{terminal_message, Notifier, NotifyError};
use crate::shared::{is_binary_available, ProcessCommand};
use crate::task::Task;
use std::time::Duration;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// `osascript` on macOS, `notify-send` elsewhere. A missing binary is logged
/// and otherwise ignored.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    binary: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DesktopNotifier {
    pub fn new() -> Self {
        let binary = if cfg!(target_os = "macos") {
            "osascript"
        } else {
            "notify-send"
        };
        Self::with_binary(binary)
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(&self, title: &str, message: &str) -> Vec<String> {
        if self.binary.ends_with("osascript") {
            vec![
                "-e".to_string(),
                format!(
                    "display notification {} with title {}",
                    applescript_string(message),
                    applescript_string(title)
                ),
            ]
        } else {
            vec![title.to_string(), message.to_string()]
        }
    }

    pub fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        if !is_binary_available(&self.binary) {
            tracing::info!(binary = %self.binary, title, "desktop notifier unavailable; skipping");
            return Ok(());
        }
        let output = ProcessCommand::new(&self.binary)
            .args(self.args(title, message))
            .timeout(NOTIFY_TIMEOUT)
            .run()
            .map_err(|err| NotifyError::Desktop(err.to_string()))?;
        if !output.success() {
            return Err(NotifyError::Desktop(output.combined()));
        }
        Ok(())
    }
}

fn applescript_string(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Notifier for DesktopNotifier {
    fn task_finished(&self, task: &Task) -> Result<(), NotifyError> {
        match terminal_message(task) {
            Some((title, message)) => self.send(title, &message),
            None => Ok(()),
        }
    }
}
