//! HTTP ingress: task create/list/get, a health probe, and the Slack
//! slash-command endpoint used in HTTP mode.

use crate::channels::slack::{SlackError, SlackIngest};
use crate::shared::ErrorKind;
use crate::store::{Store, StoreError};
use crate::task::{EngineError, TaskEngine};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub mod slack;
pub mod tasks;

/// Slack HTTP-mode wiring. Without a signing secret requests are accepted
/// unverified.
pub struct SlackHttp {
    pub ingest: Arc<SlackIngest>,
    pub signing_secret: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub engine: TaskEngine,
    pub slack: Option<Arc<SlackHttp>>,
}

impl AppState {
    pub fn new(engine: TaskEngine) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            slack: None,
        }
    }

    pub fn with_slack(mut self, slack: SlackHttp) -> Self {
        self.slack = Some(Arc::new(slack));
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(tasks::health))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/create", post(tasks::create_task))
        .route("/api/tasks/{id}", get(tasks::get_task))
        .route("/slack/commands", post(slack::slash_command))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `shutdown` resolves. In-flight task threads are not
/// interrupted.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "http api listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Config => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientExternal => StatusCode::BAD_GATEWAY,
        ErrorKind::SubprocessFailure | ErrorKind::Store | ErrorKind::Decrypt => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// JSON error body `{error, kind}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: status_for(kind),
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: ErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), kind = %self.kind, error = %self.message, "request failed");
        }
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind.as_str() })),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(id) => ApiError::not_found(format!("task {id} not found")),
            other => ApiError::new(other.kind(), other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::new(err.kind(), err.to_string())
    }
}

impl From<SlackError> for ApiError {
    fn from(err: SlackError) -> Self {
        ApiError::new(err.kind(), err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::new(ErrorKind::Store, format!("worker thread failed: {err}"))
    }
}
