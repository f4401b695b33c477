//! Build agent collaborator
//!
//! The engine never interprets what a stage does; it hands a command to a
//! [`CommandRunner`] and records the reported outcome. The process-backed
//! implementation runs commands in the run's workspace with piped output
//! and a hard timeout.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

use conveyor_core::domain::stage::CommandSpec;

/// What a command execution reported back
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("i/o error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes commands on behalf of the pipeline and deployment strategies
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command in `workspace`, killing it once `timeout` elapses
    async fn run(
        &self,
        spec: &CommandSpec,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<CommandOutcome, AgentError>;
}

/// Command runner backed by local child processes
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<CommandOutcome, AgentError> {
        let start = Instant::now();

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        // kill_on_drop reaps the child when the timeout wins the race
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AgentError::TimedOut(timeout))??;

        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}
