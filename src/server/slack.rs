use super::{ApiError, AppState};
use crate::channels::slack::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::channels::slack::{verify_signature, SlashCommand};
use crate::shared::ErrorKind;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use std::sync::Arc;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Acks within Slack's 3 s window; parsing, submission and the reply on
/// `response_url` happen on a blocking thread afterwards.
pub async fn slash_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let Some(slack) = state.slack.clone() else {
        return Err(ApiError::not_found("slack http mode is not enabled"));
    };

    if let Some(secret) = slack
        .signing_secret
        .as_deref()
        .filter(|secret| !secret.trim().is_empty())
    {
        verify_signature(
            secret,
            header(&headers, TIMESTAMP_HEADER),
            header(&headers, SIGNATURE_HEADER),
            &body,
            Utc::now().timestamp(),
        )
        .map_err(|err| {
            tracing::warn!(error = %err, "slack request rejected");
            ApiError::from(err).with_status(StatusCode::UNAUTHORIZED)
        })?;
    }

    let body = std::str::from_utf8(&body)
        .map_err(|_| ApiError::new(ErrorKind::Validation, "slash command body is not utf-8"))?;
    let slash = SlashCommand::from_form(body);
    let ingest = Arc::clone(&slack.ingest);
    tokio::task::spawn_blocking(move || {
        if let Err(err) = ingest.handle_slash(&slash) {
            tracing::info!(channel = %slash.channel_id, error = %err, "slash command rejected");
        }
    });
    Ok(StatusCode::OK)
}
