//! Event normalizer
//!
//! Maps vendor-specific webhook payloads into canonical build requests.
//! Runs after signature verification; the raw body it sees is authentic.

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use conveyor_core::domain::request::{BuildRequest, TriggerEvent};
use conveyor_core::dto::webhook::{PullRequestPayload, PushPayload};

/// Pull request actions that trigger a build; everything else is filtered
const PR_TRIGGER_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

/// Sha reported for a deleted ref
const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Outcome of normalizing a verified payload
#[derive(Debug, Clone)]
pub enum Normalization {
    /// The payload maps to a build request
    Request(BuildRequest),
    /// Recognized event that does not trigger a build (not configured,
    /// ref deletion, uninteresting pull request action)
    Skipped,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Normalizes a verified webhook body into a build request
///
/// `event` is the vendor's declared event type (the `x-github-event`
/// header). Event types outside `triggers` are filtered, not failed.
pub fn normalize(
    event: &str,
    body: &[u8],
    triggers: &[TriggerEvent],
) -> Result<Normalization, NormalizeError> {
    let kind = match event {
        "push" => TriggerEvent::Push,
        "pull_request" => TriggerEvent::PullRequest,
        other => return Err(NormalizeError::UnsupportedEvent(other.to_string())),
    };

    if !triggers.contains(&kind) {
        tracing::debug!("Filtered {} event: not in configured trigger set", event);
        return Ok(Normalization::Skipped);
    }

    match kind {
        TriggerEvent::Push => normalize_push(body),
        TriggerEvent::PullRequest => normalize_pull_request(body),
    }
}

fn normalize_push(body: &[u8]) -> Result<Normalization, NormalizeError> {
    let payload: PushPayload = serde_json::from_slice(body)
        .map_err(|e| NormalizeError::MalformedPayload(e.to_string()))?;

    if payload.deleted || payload.after == ZERO_SHA {
        tracing::debug!(git_ref = %payload.git_ref, "Filtered push for deleted ref");
        return Ok(Normalization::Skipped);
    }

    let source_ref = strip_ref_prefix(&payload.git_ref);
    validate_fields(&payload.repository.full_name, source_ref, &payload.after)?;

    Ok(Normalization::Request(build_request(
        payload.repository.full_name,
        source_ref.to_string(),
        payload.after,
        TriggerEvent::Push,
        body,
    )))
}

fn normalize_pull_request(body: &[u8]) -> Result<Normalization, NormalizeError> {
    let payload: PullRequestPayload = serde_json::from_slice(body)
        .map_err(|e| NormalizeError::MalformedPayload(e.to_string()))?;

    if !PR_TRIGGER_ACTIONS.contains(&payload.action.as_str()) {
        tracing::debug!(action = %payload.action, "Filtered pull request action");
        return Ok(Normalization::Skipped);
    }

    let head = &payload.pull_request.head;
    let source_ref = strip_ref_prefix(&head.git_ref);
    validate_fields(&payload.repository.full_name, source_ref, &head.sha)?;

    Ok(Normalization::Request(build_request(
        payload.repository.full_name,
        source_ref.to_string(),
        head.sha.clone(),
        TriggerEvent::PullRequest,
        body,
    )))
}

fn build_request(
    repository: String,
    source_ref: String,
    commit_sha: String,
    trigger: TriggerEvent,
    body: &[u8],
) -> BuildRequest {
    BuildRequest {
        id: Uuid::new_v4(),
        repository,
        source_ref,
        commit_sha,
        trigger,
        received_at: chrono::Utc::now(),
        payload_digest: hex::encode(Sha256::digest(body)),
    }
}

/// Strips "refs/heads/" or "refs/tags/" from a fully qualified ref
fn strip_ref_prefix(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
}

fn validate_fields(
    repository: &str,
    source_ref: &str,
    commit_sha: &str,
) -> Result<(), NormalizeError> {
    if repository.is_empty() {
        return Err(NormalizeError::MalformedPayload(
            "repository identifier is empty".to_string(),
        ));
    }
    if source_ref.is_empty() {
        return Err(NormalizeError::MalformedPayload("ref is empty".to_string()));
    }
    if commit_sha.is_empty() {
        return Err(NormalizeError::MalformedPayload(
            "commit sha is empty".to_string(),
        ));
    }
    Ok(())
}
