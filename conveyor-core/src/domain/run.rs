//! Pipeline run domain types

use serde::{Deserialize, Serialize};

use crate::domain::request::BuildRequest;
use crate::domain::stage::{Stage, StageOutcome};

/// Identifier of a pipeline run
///
/// Monotonically increasing, unique for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One entry of a run's stage history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// How many executions were needed (retries included); 0 for skipped stages
    pub attempts: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
}

/// One scheduled execution of a build request
///
/// Owned by the scheduler until an agent is assigned, then by the pipeline
/// state machine for its lifetime. Archived after the final notification
/// has been handed to the status reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub request: BuildRequest,
    pub current_stage: Option<Stage>,
    pub stage_history: Vec<StageRecord>,
    pub status: RunStatus,
    pub agent_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PipelineRun {
    pub fn new(run_id: RunId, request: BuildRequest, agent_id: String) -> Self {
        Self {
            run_id,
            request,
            current_stage: None,
            stage_history: Vec::new(),
            status: RunStatus::Running,
            agent_id,
            started_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    /// Outcome of the given stage, if it has been recorded
    pub fn outcome_of(&self, stage: Stage) -> Option<StageOutcome> {
        self.stage_history
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::TriggerEvent;
    use crate::domain::stage::StageFailure;
    use uuid::Uuid;

    fn run() -> PipelineRun {
        let request = BuildRequest {
            id: Uuid::new_v4(),
            repository: "acme/app".to_string(),
            source_ref: "main".to_string(),
            commit_sha: "def456".to_string(),
            trigger: TriggerEvent::Push,
            received_at: chrono::Utc::now(),
            payload_digest: "0".repeat(64),
        };
        PipelineRun::new(RunId(1), request, "agent-0".to_string())
    }

    #[test]
    fn test_new_run_is_running() {
        let run = run();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.stage_history.is_empty());
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_outcome_of_recorded_stage() {
        let mut run = run();
        let now = chrono::Utc::now();
        run.stage_history.push(StageRecord {
            stage: Stage::Build,
            outcome: StageOutcome::Failure(StageFailure::CommandError),
            attempts: 1,
            started_at: now,
            ended_at: now,
        });

        assert_eq!(
            run.outcome_of(Stage::Build),
            Some(StageOutcome::Failure(StageFailure::CommandError))
        );
        assert_eq!(run.outcome_of(Stage::Test), None);
    }
}
