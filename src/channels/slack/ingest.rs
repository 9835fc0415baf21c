use super::command::{parse_command, parse_follow_up, strip_mentions, SlackCommand};
use super::{SlackError, SlackPoster};
use crate::notify::starting_message;
use crate::shared::generate_branch_name;
use crate::store::{Store, SETTING_BRANCH_PREFIX};
use crate::task::{
    CreateTaskRequest, ParentLink, Task, TaskLauncher, TaskOptions, META_SLACK_CHANNEL_ID,
    META_SLACK_RESPONSE_URL, META_SLACK_ROOT_TS,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// The fields of a slash-command payload Fog reads, from either the Socket
/// Mode envelope or the HTTP form body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SlashCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub response_url: String,
}

impl SlashCommand {
    /// Decodes an `application/x-www-form-urlencoded` slash-command body.
    /// Unknown fields are ignored; undecodable values are dropped.
    pub fn from_form(body: &str) -> Self {
        let mut slash = SlashCommand::default();
        for pair in body.split('&').filter(|pair| !pair.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            let spaced = raw.replace('+', " ");
            let Ok(value) = urlencoding::decode(&spaced) else {
                continue;
            };
            let value = value.into_owned();
            match key {
                "command" => slash.command = value,
                "text" => slash.text = value,
                "channel_id" => slash.channel_id = value,
                "user_id" => slash.user_id = value,
                "response_url" => slash.response_url = value,
                _ => {}
            }
        }
        slash
    }
}

/// An `app_mention` event body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AppMention {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl AppMention {
    /// `thread_ts` when present, otherwise the message's own `ts`.
    pub fn root_ts(&self) -> Option<&str> {
        self.thread_ts
            .as_deref()
            .or(self.ts.as_deref())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn is_thread_reply(&self) -> bool {
        match (&self.thread_ts, &self.ts) {
            (Some(thread), Some(ts)) => thread != ts,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Turns Slack slash commands and mentions into tasks and replies in the
/// originating place.
pub struct SlackIngest {
    store: Arc<Store>,
    launcher: Arc<dyn TaskLauncher>,
    poster: Arc<dyn SlackPoster>,
    default_branch_prefix: String,
}

impl SlackIngest {
    pub fn new(
        store: Arc<Store>,
        launcher: Arc<dyn TaskLauncher>,
        poster: Arc<dyn SlackPoster>,
        default_branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            launcher,
            poster,
            default_branch_prefix: default_branch_prefix.into(),
        }
    }

    pub fn poster(&self) -> &Arc<dyn SlackPoster> {
        &self.poster
    }

    fn branch_prefix(&self) -> String {
        self.store
            .get_setting(SETTING_BRANCH_PREFIX)
            .ok()
            .flatten()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.default_branch_prefix.clone())
    }

    fn request_from_command(&self, command: &SlackCommand) -> CreateTaskRequest {
        let task_id = Uuid::new_v4();
        let branch = command
            .branch
            .clone()
            .unwrap_or_else(|| generate_branch_name(&self.branch_prefix(), &command.prompt, &task_id));
        CreateTaskRequest {
            repo: Some(command.repo.clone()),
            branch,
            prompt: command.prompt.clone(),
            ai_tool: command.tool.clone(),
            model: command.model.clone(),
            options: TaskOptions {
                commit: true,
                create_pr: command.auto_pr,
                commit_msg: command.commit_msg.clone().unwrap_or_default(),
                ..TaskOptions::default()
            },
            task_id: Some(task_id),
            ..CreateTaskRequest::default()
        }
    }

    /// Parses and submits a slash command. Problems are reported ephemerally
    /// on `response_url` and returned.
    pub fn handle_slash(&self, slash: &SlashCommand) -> Result<Task, SlackError> {
        let result = parse_command(&slash.text).and_then(|command| {
            let mut request = self.request_from_command(&command);
            request
                .metadata
                .insert(META_SLACK_CHANNEL_ID.to_string(), slash.channel_id.clone());
            if !slash.response_url.trim().is_empty() {
                request
                    .metadata
                    .insert(META_SLACK_RESPONSE_URL.to_string(), slash.response_url.clone());
            }
            self.launcher
                .submit(request)
                .map_err(|err| SlackError::Task(err.to_string()))
        });

        match result {
            Ok(task) => {
                self.reply_slash(slash, &starting_message(&task.branch), false);
                tracing::info!(task_id = %task.id, channel = %slash.channel_id, branch = %task.branch, "slash command accepted");
                self.launcher.launch(task.clone());
                Ok(task)
            }
            Err(err) => {
                self.reply_slash(slash, &format!("⚠️ {err}"), true);
                Err(err)
            }
        }
    }

    fn reply_slash(&self, slash: &SlashCommand, text: &str, ephemeral: bool) {
        if slash.response_url.trim().is_empty() {
            return;
        }
        if let Err(err) = self.poster.post_response(&slash.response_url, text, ephemeral) {
            tracing::warn!(channel = %slash.channel_id, error = %err, "failed to reply to slash command");
        }
    }

    /// Routes an `app_mention`. Returns `Ok(None)` for events that are
    /// ignored (bot authors, subtypes, no timestamp).
    pub fn handle_mention(&self, event: &AppMention) -> Result<Option<Task>, SlackError> {
        if event.bot_id.is_some() || event.subtype.is_some() || event.channel.trim().is_empty() {
            return Ok(None);
        }
        let Some(root_ts) = event.root_ts().map(str::to_string) else {
            return Ok(None);
        };
        let text = strip_mentions(&event.text);

        let parent = if event.is_thread_reply() {
            self.store
                .latest_task_in_thread(&event.channel, &root_ts)
                .map_err(|err| SlackError::Task(err.to_string()))?
        } else {
            None
        };

        let request = match &parent {
            Some(parent) => self.follow_up_request(parent, &text),
            None => parse_command(&text).map(|command| self.request_from_command(&command)),
        };
        let result = request.and_then(|mut request| {
            request
                .metadata
                .insert(META_SLACK_CHANNEL_ID.to_string(), event.channel.clone());
            request
                .metadata
                .insert(META_SLACK_ROOT_TS.to_string(), root_ts.clone());
            self.launcher
                .submit(request)
                .map_err(|err| SlackError::Task(err.to_string()))
        });

        match result {
            Ok(task) => {
                self.reply_thread(&event.channel, &root_ts, &starting_message(&task.branch));
                tracing::info!(
                    task_id = %task.id,
                    channel = %event.channel,
                    root_ts = %root_ts,
                    follow_up = parent.is_some(),
                    "mention accepted"
                );
                self.launcher.launch(task.clone());
                Ok(Some(task))
            }
            Err(err) => {
                self.reply_thread(&event.channel, &root_ts, &format!("⚠️ {err}"));
                Err(err)
            }
        }
    }

    /// Inherits repo, tool, model and PR flag from `parent`; the new branch
    /// forks from the parent's branch and worktree.
    fn follow_up_request(&self, parent: &Task, text: &str) -> Result<CreateTaskRequest, SlackError> {
        let prompt = parse_follow_up(text)?;
        let repo = self
            .store
            .get_repo(parent.repo_id)
            .map_err(|err| SlackError::Task(err.to_string()))?
            .ok_or_else(|| SlackError::Task(format!("repository {} no longer exists", parent.repo_id)))?;
        let task_id = Uuid::new_v4();
        Ok(CreateTaskRequest {
            repo: Some(repo.name),
            branch: generate_branch_name(&self.branch_prefix(), &prompt, &task_id),
            prompt,
            ai_tool: Some(parent.ai_tool.clone()),
            model: parent.model.clone(),
            options: TaskOptions {
                commit: true,
                create_pr: parent.options.create_pr,
                ..TaskOptions::default()
            },
            metadata: BTreeMap::new(),
            parent: Some(ParentLink::from_task(parent)),
            task_id: Some(task_id),
            ..CreateTaskRequest::default()
        })
    }

    fn reply_thread(&self, channel: &str, root_ts: &str, text: &str) {
        if let Err(err) = self.poster.post_thread(channel, root_ts, text) {
            tracing::warn!(channel, root_ts, error = %err, "failed to post thread reply");
        }
    }
}
