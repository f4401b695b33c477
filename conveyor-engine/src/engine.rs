//! Engine facade
//!
//! Wires the queue, scheduler, executor, selector and reporter together and
//! exposes the narrow surface the HTTP layer talks to: submit, abort,
//! rollback, run inspection and metrics.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use conveyor_core::domain::deploy::DeployResult;
use conveyor_core::domain::request::BuildRequest;
use conveyor_core::domain::run::{PipelineRun, RunId};

use crate::agent::CommandRunner;
use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::deploy::{DeployError, StrategySelector};
use crate::pipeline::PipelineExecutor;
use crate::queue::DedupQueue;
use crate::registry::{AbortOutcome, RunRegistry};
use crate::report::{HttpCommitStatusSink, HttpNotificationSink, Reporter, StatusSink};
use crate::scheduler::Scheduler;

/// Scheduling and queue gauges for the metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Entries waiting for a free agent
    pub queue_depth: usize,
    /// Runs currently bound to an agent
    pub active_runs: usize,
    /// Keys inside their coalescing quiet period
    pub pending_coalescing: usize,
    pub superseded_total: u64,
    pub dropped_total: u64,
    pub archived_total: u64,
}

/// The orchestration engine
///
/// Owns all shared state behind internally synchronized components; the
/// server holds one `Arc<Engine>`.
pub struct Engine {
    config: Arc<Config>,
    queue: DedupQueue,
    scheduler: Scheduler,
    registry: Arc<RunRegistry>,
    selector: Arc<StrategySelector>,
    _reporter_worker: JoinHandle<()>,
}

impl Engine {
    /// Starts the engine's background tasks and returns the facade
    pub fn start(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ArtifactStore>,
        sinks: Vec<Arc<dyn StatusSink>>,
    ) -> Self {
        let config = Arc::new(config);

        for dir in [
            config.workspace_base.clone(),
            config.workspace_base.join("deploy"),
            config.artifact_dir.clone(),
        ] {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("Failed to create {}: {}", dir.display(), e);
            }
        }

        let (reporter, reporter_worker) = Reporter::start(sinks, config.report_max_attempts);
        let registry = Arc::new(RunRegistry::new());
        let selector = Arc::new(StrategySelector::new(Arc::clone(&runner), &config));

        let executor = Arc::new(PipelineExecutor::new(
            &config,
            runner,
            store,
            Arc::clone(&selector),
            reporter,
            Arc::clone(&registry),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::start(&config, executor, Arc::clone(&registry), rx);
        let queue = DedupQueue::new(config.debounce_window, tx);

        info!(
            capacity = config.agent_pool_capacity,
            debounce = ?config.debounce_window,
            "Engine started"
        );

        Self {
            config,
            queue,
            scheduler,
            registry,
            selector,
            _reporter_worker: reporter_worker,
        }
    }

    /// Builds the HTTP sinks named in the configuration
    pub fn sinks_from_config(config: &Config) -> Vec<Arc<dyn StatusSink>> {
        let mut sinks: Vec<Arc<dyn StatusSink>> = Vec::new();
        if let Some(url) = &config.commit_status_url {
            sinks.push(Arc::new(HttpCommitStatusSink::new(url)));
        }
        if let Some(url) = &config.notification_url {
            sinks.push(Arc::new(HttpNotificationSink::new(url)));
        }
        sinks
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Feeds a normalized build request into the coalescing queue
    pub fn submit(&self, request: BuildRequest) {
        info!(
            repository = %request.repository,
            source_ref = %request.source_ref,
            commit_sha = %request.commit_sha,
            trigger = request.trigger.name(),
            "Build request accepted"
        );
        self.queue.submit(request);
    }

    /// Signals an external abort for a run
    pub fn abort(&self, run_id: RunId) -> AbortOutcome {
        self.registry.abort(run_id)
    }

    /// Restores the previously deployed artifact in an environment
    pub async fn rollback(&self, environment: &str) -> Result<DeployResult, DeployError> {
        let target = self
            .config
            .targets
            .iter()
            .find(|t| t.environment == environment)
            .ok_or_else(|| DeployError::UnknownEnvironment(environment.to_string()))?;

        self.selector.rollback(target).await
    }

    pub fn run(&self, run_id: RunId) -> Option<PipelineRun> {
        self.registry.get(run_id)
    }

    pub fn runs(&self) -> Vec<PipelineRun> {
        self.registry.list()
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            queue_depth: self.scheduler.queue_depth(),
            active_runs: self.scheduler.active_runs(),
            pending_coalescing: self.queue.pending_len(),
            superseded_total: self.queue.superseded_total(),
            dropped_total: self.scheduler.dropped_total(),
            archived_total: self.registry.archived_total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ProcessRunner;
    use crate::artifact::MemoryArtifactStore;

    fn engine() -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new("secret".to_string());
        config.workspace_base = dir.path().join("workspaces");
        config.artifact_dir = dir.path().join("artifacts");
        Engine::start(
            config,
            Arc::new(ProcessRunner::new()),
            Arc::new(MemoryArtifactStore::new()),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_metrics_start_at_zero() {
        let engine = engine();
        let metrics = engine.metrics();
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.active_runs, 0);
        assert_eq!(metrics.pending_coalescing, 0);
        assert_eq!(metrics.dropped_total, 0);
    }

    #[tokio::test]
    async fn test_rollback_unknown_environment() {
        let engine = engine();
        let result = engine.rollback("nowhere").await;
        assert!(matches!(result, Err(DeployError::UnknownEnvironment(_))));
    }

    #[tokio::test]
    async fn test_abort_unknown_run() {
        let engine = engine();
        assert_eq!(engine.abort(RunId(42)), AbortOutcome::NotFound);
    }
}
