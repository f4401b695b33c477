//! Pipeline stage domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered pipeline stages
///
/// Stages always execute in this order; `Notify` runs unconditionally,
/// even for failed or aborted runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Checkout,
    Build,
    Test,
    Quality,
    Package,
    Deploy,
    Notify,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 7] = [
        Stage::Checkout,
        Stage::Build,
        Stage::Test,
        Stage::Quality,
        Stage::Package,
        Stage::Deploy,
        Stage::Notify,
    ];

    /// Position of this stage in the execution order
    pub fn ordinal(&self) -> usize {
        match self {
            Stage::Checkout => 0,
            Stage::Build => 1,
            Stage::Test => 2,
            Stage::Quality => 3,
            Stage::Package => 4,
            Stage::Deploy => 5,
            Stage::Notify => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Checkout => "checkout",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Quality => "quality",
            Stage::Package => "package",
            Stage::Deploy => "deploy",
            Stage::Notify => "notify",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a stage failure does to the rest of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the run; remaining stages (except notify) are skipped
    AbortPipeline,
    /// Record the failure in stage history and advance anyway
    ContinueWithWarning,
}

/// Reason a stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailure {
    CommandError,
    Timeout,
    QualityGateFailed,
    DeployFailed,
}

/// Outcome of one stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure(StageFailure),
    /// Not executed because an earlier failure aborted the pipeline
    Skipped,
    /// Cancelled by an external abort signal
    Aborted,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

/// Command to execute for a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// A command run through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }

    /// Returns a copy with the given variables merged into the environment
    pub fn with_env(mut self, vars: &HashMap<String, String>) -> Self {
        for (k, v) in vars {
            self.env.insert(k.clone(), v.clone());
        }
        self
    }
}

/// Static configuration for one pipeline stage
///
/// Shared read-only across all runs. `command` is `None` for stages whose
/// execution is built in (deploy dispatches to the strategy selector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub stage: Stage,
    pub command: Option<CommandSpec>,
    pub retryable: bool,
    pub timeout_secs: u64,
    pub failure_policy: FailurePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let ordinals: Vec<usize> = Stage::ALL.iter().map(|s| s.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_shell_command() {
        let spec = CommandSpec::shell("echo hello");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "echo hello"]);
    }

    #[test]
    fn test_with_env_merges() {
        let mut base = HashMap::new();
        base.insert("A".to_string(), "1".to_string());
        let spec = CommandSpec::shell("true").with_env(&base);

        let mut extra = HashMap::new();
        extra.insert("B".to_string(), "2".to_string());
        let spec = spec.with_env(&extra);

        assert_eq!(spec.env.get("A"), Some(&"1".to_string()));
        assert_eq!(spec.env.get("B"), Some(&"2".to_string()));
    }
}
