//! Artifact reference domain types

use serde::{Deserialize, Serialize};

use crate::domain::run::RunId;

/// Immutable pointer to a built, deployable output
///
/// Produced by the package stage, consumed by the deploy stage and by
/// rollback operations. A rollback re-points deployment at a prior
/// reference; it never mutates one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub run_id: RunId,
    /// Location in the artifact storage backend
    pub storage_key: String,
    /// Hex SHA-256 of the artifact bytes
    pub checksum: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
