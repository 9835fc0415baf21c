use super::{ApiError, AppState};
use crate::shared::ErrorKind;
use crate::task::{CreateTaskRequest, Task};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let store = state.store.clone();
    let tasks = tokio::task::spawn_blocking(move || store.list_tasks(query.limit)).await??;
    Ok(Json(tasks))
}

/// `202` with the `CREATED` record when `options.async`, otherwise runs the
/// task on a blocking thread and returns the terminal record.
pub async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::new(ErrorKind::Validation, rejection.body_text()))?;
    let async_mode = request.options.async_mode;

    let engine = state.engine.clone();
    let task = tokio::task::spawn_blocking(move || engine.create_task(request)).await??;

    if async_mode {
        tracing::info!(task_id = %task.id, branch = %task.branch, "task accepted for background run");
        drop(state.engine.spawn(task.clone()));
        return Ok((StatusCode::ACCEPTED, Json(task)));
    }

    let engine = state.engine.clone();
    let finished = tokio::task::spawn_blocking(move || engine.run(task)).await??;
    Ok((StatusCode::OK, Json(finished)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = Uuid::parse_str(raw_id.trim())
        .map_err(|_| ApiError::not_found(format!("task {raw_id} not found")))?;
    let store = state.store.clone();
    let task = tokio::task::spawn_blocking(move || store.get_task(&id)).await??;
    task.map(Json)
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))
}
