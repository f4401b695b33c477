//! Deployment API Handlers
//!
//! Manual rollback endpoint; deploys themselves happen inside pipeline runs.

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::deploy::DeployResult;
use conveyor_engine::Engine;
use conveyor_engine::deploy::DeployError;
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};

/// POST /deploy/{environment}/rollback
/// Restore the previously deployed artifact in an environment
pub async fn rollback(
    State(engine): State<Arc<Engine>>,
    Path(environment): Path<String>,
) -> ApiResult<Json<DeployResult>> {
    tracing::info!("Rollback requested for environment {}", environment);

    engine
        .rollback(&environment)
        .await
        .map(Json)
        .map_err(|e| match e {
            DeployError::UnknownEnvironment(_) => ApiError::NotFound(e.to_string()),
            DeployError::NoPreviousArtifact(_) => ApiError::Conflict(e.to_string()),
            other => ApiError::InternalError(other.to_string()),
        })
}
