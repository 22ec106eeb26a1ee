//! Task endpoints, including the droid-facing checkout.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::{debug, info};

use droidstore_core::{RunId, TaskDraft, TaskId, TaskPatch};
use droidstore_store::Checkout;

use crate::http::error::ApiError;
use crate::http::responses::BatchAdded;
use crate::state::AppState;

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let tasks = state.store.list_tasks(RunId::new(id)).await?;
    Ok(Json(Value::Array(
        tasks.iter().map(|t| t.digest()).collect(),
    )))
}

/// Batch insert. The body is a JSON array of task objects; the whole
/// batch is validated before anything is written.
pub async fn add_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<BatchAdded>, ApiError> {
    let items = body.as_array().ok_or_else(|| {
        ApiError::Validation("expected a JSON array of tasks".to_string())
    })?;
    let drafts = items
        .iter()
        .map(TaskDraft::from_request)
        .collect::<Result<Vec<_>, _>>()?;

    let run_id = RunId::new(id);
    let added = state.store.create_tasks(run_id, drafts).await?;
    info!(run_id = %run_id, added, "tasks added in batch");
    Ok(Json(BatchAdded::new(added)))
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let draft = TaskDraft::from_request(&body)?;
    let task = state.store.create_task(RunId::new(id), draft).await?;
    Ok(Json(task.digest()))
}

/// Claim one task for the calling droid.
///
/// Exhaustion answers 204 with an empty body; the droid treats that as
/// the end of the run. A row-lock race surfaces as 500 and the droid
/// retries after a short backoff.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let run_id = RunId::new(id);
    match state.store.checkout(run_id).await? {
        Checkout::Claimed(task) => {
            debug!(run_id = %run_id, task_id = %task.id, "task checked out");
            Ok(Json(task.digest()).into_response())
        }
        Checkout::Exhausted => {
            debug!(run_id = %run_id, "no task left to check out");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let task = state.store.get_task(TaskId::new(id)).await?;
    Ok(Json(task.digest()))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let patch = TaskPatch::from_value(&body)?;
    let task = state.store.update_task(TaskId::new(id), patch).await?;
    Ok(Json(task.digest()))
}
