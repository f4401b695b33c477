//! Build request domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kind that can trigger a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Push,
    PullRequest,
}

impl TriggerEvent {
    /// Wire name of the event, as carried by the webhook event header
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Push => "push",
            TriggerEvent::PullRequest => "pull_request",
        }
    }
}

/// Coalescing key for build requests
///
/// All requests for the same (repository, ref) pair belong to one pipeline
/// family and are coalesced against each other; requests for distinct keys
/// are fully independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub repository: String,
    pub source_ref: String,
}

/// A validated, normalized request to build one commit
///
/// Created by the event normalizer from a verified webhook payload.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: Uuid,
    pub repository: String,
    pub source_ref: String,
    pub commit_sha: String,
    pub trigger: TriggerEvent,
    pub received_at: chrono::DateTime<chrono::Utc>,
    /// Hex SHA-256 of the raw webhook body this request was parsed from
    pub payload_digest: String,
}

impl BuildRequest {
    /// The coalescing key for this request
    pub fn key(&self) -> RequestKey {
        RequestKey {
            repository: self.repository.clone(),
            source_ref: self.source_ref.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(repository: &str, source_ref: &str, sha: &str) -> BuildRequest {
        BuildRequest {
            id: Uuid::new_v4(),
            repository: repository.to_string(),
            source_ref: source_ref.to_string(),
            commit_sha: sha.to_string(),
            trigger: TriggerEvent::Push,
            received_at: chrono::Utc::now(),
            payload_digest: "0".repeat(64),
        }
    }

    #[test]
    fn test_key_ignores_commit_sha() {
        let a = request("acme/app", "main", "a1");
        let b = request("acme/app", "main", "a2");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_refs() {
        let a = request("acme/app", "main", "a1");
        let b = request("acme/app", "develop", "a1");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_trigger_event_names() {
        assert_eq!(TriggerEvent::Push.name(), "push");
        assert_eq!(TriggerEvent::PullRequest.name(), "pull_request");
    }
}
