//! Metrics API Handler
//!
//! Exposes the engine's scheduling and queue gauges.

use axum::{Json, extract::State};
use conveyor_engine::{Engine, EngineMetrics};
use std::sync::Arc;

/// GET /metrics
/// Current queue depth, active runs and lifetime counters
pub async fn engine_metrics(State(engine): State<Arc<Engine>>) -> Json<EngineMetrics> {
    Json(engine.metrics())
}
