use super::{SlackError, SlackPoster};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
pub const SLACK_API_BASE_ENV: &str = "FOG_SLACK_API_BASE";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const OUTBOUND_CHUNK_CHARS: usize = 3500;

#[derive(Debug, Clone)]
pub struct SlackApiClient {
    agent: ureq::Agent,
    api_base: String,
    bot_token: String,
    app_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct EmptyData {}

#[derive(Debug, Clone, Deserialize)]
struct OpenConnectionData {
    #[serde(default)]
    url: String,
}

impl SlackApiClient {
    pub fn new(bot_token: impl Into<String>, app_token: Option<String>) -> Self {
        let api_base = std::env::var(SLACK_API_BASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SLACK_API_BASE.to_string());
        Self::with_api_base(bot_token, app_token, api_base)
    }

    pub fn with_api_base(
        bot_token: impl Into<String>,
        app_token: Option<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            api_base: api_base.into(),
            bot_token: bot_token.into(),
            app_token: app_token.filter(|token| !token.trim().is_empty()),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
        token: &str,
    ) -> Result<T, SlackError> {
        let url = self.endpoint(path);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {token}"))
            .set("Content-Type", "application/json; charset=utf-8")
            .send_json(body)
            .map_err(|e| SlackError::ApiRequest(format!("{path}: {e}")))?;
        response
            .into_json::<T>()
            .map_err(|e| SlackError::ApiRequest(format!("{path}: {e}")))
    }

    fn call(&self, path: &str, body: serde_json::Value, token: &str) -> Result<(), SlackError> {
        let envelope: SlackEnvelope<EmptyData> = self.post_json(path, body, token)?;
        if !envelope.ok {
            return Err(SlackError::ApiResponse(
                envelope.error.unwrap_or_else(|| format!("{path} failed")),
            ));
        }
        Ok(())
    }

    /// `apps.connections.open` with the app-level token; returns the
    /// single-use WebSocket URL.
    pub fn open_socket_url(&self) -> Result<String, SlackError> {
        let app_token = self
            .app_token
            .as_deref()
            .ok_or(SlackError::MissingCredential("app_token"))?;
        let envelope: SlackEnvelope<OpenConnectionData> =
            self.post_json("apps.connections.open", json!({}), app_token)?;
        if !envelope.ok {
            return Err(SlackError::ApiResponse(
                envelope
                    .error
                    .unwrap_or_else(|| "apps.connections.open failed".to_string()),
            ));
        }
        if envelope.data.url.trim().is_empty() {
            return Err(SlackError::ApiResponse(
                "apps.connections.open returned no url".to_string(),
            ));
        }
        Ok(envelope.data.url)
    }

    fn post_chunks(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<(), SlackError> {
        for chunk in chunk_message(text) {
            let mut body = json!({ "channel": channel, "text": chunk });
            if let Some(thread_ts) = thread_ts {
                body["thread_ts"] = json!(thread_ts);
            }
            self.call("chat.postMessage", body, &self.bot_token)?;
        }
        Ok(())
    }
}

impl SlackPoster for SlackApiClient {
    fn post_message(&self, channel: &str, text: &str) -> Result<(), SlackError> {
        self.post_chunks(channel, None, text)
    }

    fn post_thread(&self, channel: &str, thread_ts: &str, text: &str) -> Result<(), SlackError> {
        self.post_chunks(channel, Some(thread_ts), text)
    }

    fn post_response(
        &self,
        response_url: &str,
        text: &str,
        ephemeral: bool,
    ) -> Result<(), SlackError> {
        let response_type = if ephemeral { "ephemeral" } else { "in_channel" };
        let text: String = text.chars().take(OUTBOUND_CHUNK_CHARS).collect();
        self.agent
            .post(response_url)
            .send_json(json!({ "response_type": response_type, "text": text }))
            .map_err(|e| SlackError::ApiRequest(format!("response_url: {e}")))?;
        Ok(())
    }
}

pub(crate) fn chunk_message(input: &str) -> Vec<String> {
    if input.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = input.chars().collect();
    chars
        .chunks(OUTBOUND_CHUNK_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
