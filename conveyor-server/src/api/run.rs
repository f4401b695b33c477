//! Run API Handlers
//!
//! HTTP endpoints for inspecting and aborting pipeline runs.

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::run::{PipelineRun, RunId};
use conveyor_engine::Engine;
use conveyor_engine::registry::AbortOutcome;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};

/// GET /runs
/// List all known runs, active and archived
pub async fn list_runs(State(engine): State<Arc<Engine>>) -> Json<Vec<PipelineRun>> {
    Json(engine.runs())
}

/// GET /runs/{id}
/// Get run details by ID
pub async fn get_run(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<PipelineRun>> {
    engine
        .run(RunId(id))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}

/// POST /runs/{id}/abort
/// Signal an external abort for a run
pub async fn abort_run(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    tracing::info!("Abort requested for run {}", id);

    match engine.abort(RunId(id)) {
        AbortOutcome::Signalled => Ok(Json(json!({ "status": "aborting" }))),
        AbortOutcome::AlreadyFinished => Err(ApiError::Conflict(format!(
            "Run {} already reached a terminal state",
            id
        ))),
        AbortOutcome::NotFound => Err(ApiError::NotFound(format!("Run {} not found", id))),
    }
}
