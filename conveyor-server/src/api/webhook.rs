//! Webhook API Handler
//!
//! The inbound path: signature verification against the raw body, then
//! normalization, then the coalescing queue. Accepted and filtered
//! deliveries both answer 200; signature failures answer 401 and payload
//! failures 400, synchronously. Everything after the queue is asynchronous
//! and reported through the status reporter, never through this response.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use conveyor_engine::Engine;
use conveyor_engine::normalizer::{self, Normalization};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::signature;

/// Header carrying the vendor's event type
pub const EVENT_HEADER: &str = "x-github-event";

/// POST /webhook/github
/// Receive a source control webhook delivery
pub async fn receive_github(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let header = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    signature::verify(&engine.config().webhook_secret, &body, header).map_err(|e| {
        tracing::warn!("Rejected webhook delivery: {}", e);
        ApiError::Unauthorized(e.to_string())
    })?;

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", EVENT_HEADER)))?;

    match normalizer::normalize(event, &body, &engine.config().triggers) {
        Ok(Normalization::Request(request)) => {
            engine.submit(request);
            Ok(Json(json!({ "status": "queued" })))
        }
        Ok(Normalization::Skipped) => Ok(Json(json!({ "status": "skipped" }))),
        Err(e) => {
            tracing::warn!("Rejected webhook payload: {}", e);
            Err(ApiError::BadRequest(e.to_string()))
        }
    }
}
