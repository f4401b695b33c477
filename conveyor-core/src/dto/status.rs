//! Outbound status reporting DTOs

use serde::{Deserialize, Serialize};

use crate::domain::run::{PipelineRun, RunId, RunStatus};
use crate::domain::stage::{Stage, StageOutcome};

/// Commit status state as understood by the source control status API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl From<RunStatus> for CommitState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => CommitState::Pending,
            RunStatus::Succeeded => CommitState::Success,
            RunStatus::Failed | RunStatus::Aborted => CommitState::Failure,
        }
    }
}

/// Named check set against a specific commit sha
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: CommitState,
    /// Name of the check, e.g. "conveyor/pipeline"
    pub context: String,
    pub description: String,
    pub target_url: Option<String>,
}

/// Per-stage line of a notification's run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Message sent to notification channels when a run reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub run_id: RunId,
    pub repository: String,
    pub source_ref: String,
    pub commit_sha: String,
    pub status: RunStatus,
    pub stages: Vec<StageSummary>,
}

impl From<&PipelineRun> for Notification {
    fn from(run: &PipelineRun) -> Self {
        let stages = run
            .stage_history
            .iter()
            .map(|record| StageSummary {
                stage: record.stage,
                outcome: record.outcome,
                attempts: record.attempts,
                duration_ms: (record.ended_at - record.started_at).num_milliseconds().max(0)
                    as u64,
            })
            .collect();

        Self {
            run_id: run.run_id,
            repository: run.request.repository.clone(),
            source_ref: run.request.source_ref.clone(),
            commit_sha: run.request.commit_sha.clone(),
            status: run.status,
            stages,
        }
    }
}
