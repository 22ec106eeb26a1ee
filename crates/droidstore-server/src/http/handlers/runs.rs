//! Run endpoints: listing, creation, mutation, deletion, restart.
//!
//! Creation and the lifecycle operations are the only places the
//! orchestrator is touched. A run row always commits before its
//! supervising job is requested; when the job request fails the run
//! stays behind and the failure surfaces to the caller, who may restart.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;
use tracing::{info, warn};

use droidstore_core::provenance::{validate_new_run, RESERVED_JOBNAME};
use droidstore_core::{NewRun, RunId, RunPatch, RunStatus};

use crate::http::error::ApiError;
use crate::http::responses::{ListRunsQuery, StatusBody};
use crate::orchestrator::SupervisorSpec;
use crate::state::AppState;

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = query.into_filter()?;
    let runs = state.store.list_runs(&filter).await?;
    Ok(Json(Value::Array(
        runs.iter().map(|r| r.digest()).collect(),
    )))
}

pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let new_run = NewRun::from_request(&body)?;
    validate_new_run(new_run.details.as_ref())?;

    let run = state.store.create_run(new_run).await?;
    info!(run_id = %run.id, owner = ?run.owner, "run created");

    // The row is committed; a job failure leaves the run behind for a
    // later restart.
    let spec = SupervisorSpec::from_run(&run)?;
    let job = state.orchestrator.create_supervisor(&spec).await?;
    info!(run_id = %run.id, job = %job, "supervising job requested");

    Ok(Json(run.digest()))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let run = state.store.get_run(RunId::new(id)).await?;
    Ok(Json(run.digest()))
}

pub async fn update_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let patch = RunPatch::from_value(&body)?;
    let run = state.store.update_run(RunId::new(id), patch).await?;
    Ok(Json(run.digest()))
}

pub async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StatusBody>, ApiError> {
    let run_id = RunId::new(id);
    let run = state.store.get_run(run_id).await?;

    // Jobs go first. If teardown fails the run stays so the caller can
    // retry the delete.
    let job_name = run
        .details
        .as_ref()
        .and_then(|d| d.get_str(RESERVED_JOBNAME))
        .map(str::to_string);
    state
        .orchestrator
        .remove_run_jobs(run_id, job_name.as_deref())
        .await?;

    state.store.delete_run(run_id).await?;
    info!(run_id = %run_id, "run and its tasks removed");
    Ok(Json(StatusBody::removed()))
}

pub async fn restart_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let run_id = RunId::new(id);
    let run = state.store.get_run(run_id).await?;

    let job_name = run
        .details
        .as_ref()
        .and_then(|d| d.get_str(RESERVED_JOBNAME))
        .map(str::to_string);
    if job_name.is_none() {
        warn!(run_id = %run_id, "no recorded job name; tearing down by label only");
    }
    state
        .orchestrator
        .remove_run_jobs(run_id, job_name.as_deref())
        .await?;

    let spec = SupervisorSpec::from_run(&run)?;
    let job = state.orchestrator.create_supervisor(&spec).await?;
    info!(run_id = %run_id, job = %job, "run restarted");

    // Restart is the one path allowed to move the status backward.
    let run = state
        .store
        .set_run_status(run_id, RunStatus::Scheduling)
        .await?;
    Ok(Json(run.digest()))
}
