//! Slack ingress: command grammar, event routing into tasks, Socket Mode
//! transport, HTTP signature checks, and the outbound Web API client.

use crate::shared::ErrorKind;

pub mod api;
pub mod command;
pub mod ingest;
pub mod signature;
pub mod socket;

pub use api::SlackApiClient;
pub use command::{parse_command, parse_follow_up, strip_mentions, SlackCommand};
pub use ingest::{AppMention, SlackIngest, SlashCommand};
pub use signature::verify_signature;
pub use socket::{run_socket_mode, Backoff};

pub const SLACK_BOT_TOKEN_ENV: &str = "SLACK_BOT_TOKEN";
pub const SLACK_APP_TOKEN_ENV: &str = "SLACK_APP_TOKEN";
pub const SLACK_SIGNING_SECRET_ENV: &str = "SLACK_SIGNING_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("missing slack credential `{0}`")]
    MissingCredential(&'static str),
    #[error("slack api request failed: {0}")]
    ApiRequest(String),
    #[error("slack api responded with error `{0}`")]
    ApiResponse(String),
    #[error("{0}")]
    Command(String),
    #[error("options are only allowed for the initial task")]
    FollowUpOptions,
    #[error("slack socket error: {0}")]
    Socket(String),
    #[error("slack request signature rejected: {0}")]
    Signature(String),
    #[error("task submission failed: {0}")]
    Task(String),
}

impl SlackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlackError::MissingCredential(_) => ErrorKind::Config,
            SlackError::Command(_)
            | SlackError::FollowUpOptions
            | SlackError::Signature(_)
            | SlackError::Task(_) => ErrorKind::Validation,
            _ => ErrorKind::TransientExternal,
        }
    }
}

/// Outbound Slack traffic. The Web API client implements it; tests record.
pub trait SlackPoster: Send + Sync {
    fn post_message(&self, channel: &str, text: &str) -> Result<(), SlackError>;
    fn post_thread(&self, channel: &str, thread_ts: &str, text: &str) -> Result<(), SlackError>;
    /// Slash-command `response_url` reply; `ephemeral` shows it to the
    /// invoking user only.
    fn post_response(&self, response_url: &str, text: &str, ephemeral: bool)
        -> Result<(), SlackError>;
}
