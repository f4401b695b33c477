//! API Module
//!
//! HTTP API layer for the engine.
//! Each submodule handles endpoints for a specific domain.

pub mod deploy;
pub mod error;
pub mod health;
pub mod metrics;
pub mod run;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post},
};
use conveyor_engine::Engine;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the main API router with all endpoints
pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Inbound webhook
        .route("/webhook/github", post(webhook::receive_github))
        // Observability
        .route("/metrics", get(metrics::engine_metrics))
        // Run endpoints
        .route("/runs", get(run::list_runs))
        .route("/runs/{id}", get(run::get_run))
        .route("/runs/{id}/abort", post(run::abort_run))
        // Deployment endpoints
        .route("/deploy/{environment}/rollback", post(deploy::rollback))
        // Add state and middleware
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}
