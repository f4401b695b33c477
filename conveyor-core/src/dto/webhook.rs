//! Vendor webhook payload shapes
//!
//! Only the fields the normalizer reads are modeled; everything else in the
//! payload is ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Repository object common to all payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

/// `push` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    /// Fully qualified ref, e.g. "refs/heads/main"
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit sha after the push; all zeros when the ref was deleted
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    pub repository: Repository,
}

/// `pull_request` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestPayload {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub head: GitRef,
}

/// Head of a pull request: branch name and commit sha
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}
