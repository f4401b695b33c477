//! Pipeline state machine
//!
//! Drives one run through the ordered stage plan. The executor never
//! interprets stage output beyond success/failure/timeout: commands go
//! through the build agent, deployments through the strategy selector. It
//! records every transition in the run's stage history, honors per-stage
//! retry and failure policies, and races in-flight work against the run's
//! abort signal. Notify always happens, whatever state the run ends in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::DeploymentTarget;
use conveyor_core::domain::run::{PipelineRun, RunStatus, StageRecord};
use conveyor_core::domain::stage::{
    FailurePolicy, Stage, StageDefinition, StageFailure, StageOutcome,
};

use crate::agent::{AgentError, CommandRunner};
use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::deploy::StrategySelector;
use crate::registry::RunRegistry;
use crate::report::ReporterHandle;

/// Executes pipeline runs against the configured stage plan
pub struct PipelineExecutor {
    stages: Vec<StageDefinition>,
    targets: Vec<DeploymentTarget>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn ArtifactStore>,
    selector: Arc<StrategySelector>,
    reporter: ReporterHandle,
    registry: Arc<RunRegistry>,
    retry_max_attempts: u32,
    workspace_base: PathBuf,
    artifact_output: PathBuf,
    clone_base_url: String,
}

impl PipelineExecutor {
    pub fn new(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ArtifactStore>,
        selector: Arc<StrategySelector>,
        reporter: ReporterHandle,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            stages: config.stages.clone(),
            targets: config.targets.clone(),
            runner,
            store,
            selector,
            reporter,
            registry,
            retry_max_attempts: config.retry_max_attempts,
            workspace_base: config.workspace_base.clone(),
            artifact_output: config.artifact_output.clone(),
            clone_base_url: config.clone_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Runs the pipeline to a terminal state and archives it
    pub async fn execute(&self, mut run: PipelineRun, mut abort_rx: watch::Receiver<bool>) {
        info!(
            run_id = %run.run_id,
            repository = %run.request.repository,
            source_ref = %run.request.source_ref,
            commit_sha = %run.request.commit_sha,
            agent_id = %run.agent_id,
            "Starting pipeline run"
        );

        self.reporter.run_started(&run);

        let workspace = self.workspace_base.join(format!("run-{}", run.run_id));
        let mut fatal = match tokio::fs::create_dir_all(&workspace).await {
            Ok(()) => false,
            Err(e) => {
                error!(run_id = %run.run_id, "Failed to create workspace: {}", e);
                true
            }
        };
        let mut aborted = false;
        let mut artifact: Option<ArtifactReference> = None;

        for def in &self.stages {
            if !aborted && *abort_rx.borrow() {
                info!(run_id = %run.run_id, "Abort signal observed");
                aborted = true;
            }

            if aborted || fatal {
                run.stage_history.push(skip_record(def.stage));
                continue;
            }

            run.current_stage = Some(def.stage);
            self.registry.update(&run);
            self.reporter.stage_started(&run, def.stage);
            info!(run_id = %run.run_id, stage = %def.stage, "Executing stage");

            let started_at = chrono::Utc::now();
            let (outcome, attempts) = self
                .run_stage_with_retry(def, &run, &workspace, &mut artifact, &mut abort_rx)
                .await;
            run.stage_history.push(StageRecord {
                stage: def.stage,
                outcome,
                attempts,
                started_at,
                ended_at: chrono::Utc::now(),
            });

            match outcome {
                StageOutcome::Success | StageOutcome::Skipped => {}
                StageOutcome::Aborted => aborted = true,
                StageOutcome::Failure(reason) => match def.failure_policy {
                    FailurePolicy::AbortPipeline => {
                        error!(
                            run_id = %run.run_id,
                            stage = %def.stage,
                            reason = ?reason,
                            "Stage failed, aborting pipeline"
                        );
                        fatal = true;
                    }
                    FailurePolicy::ContinueWithWarning => {
                        warn!(
                            run_id = %run.run_id,
                            stage = %def.stage,
                            reason = ?reason,
                            "Stage failed, continuing with warning"
                        );
                    }
                },
            }

            self.registry.update(&run);
        }

        run.status = if aborted {
            RunStatus::Aborted
        } else if fatal {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        run.finished_at = Some(chrono::Utc::now());
        run.current_stage = Some(Stage::Notify);

        // Notify runs unconditionally: the reporter gets the terminal state
        // before the run is archived
        let notify_started = chrono::Utc::now();
        self.reporter.run_finished(&run);
        run.stage_history.push(StageRecord {
            stage: Stage::Notify,
            outcome: StageOutcome::Success,
            attempts: 1,
            started_at: notify_started,
            ended_at: chrono::Utc::now(),
        });
        run.current_stage = None;

        info!(run_id = %run.run_id, status = ?run.status, "Pipeline run finished");
        self.registry.archive(run);
    }

    async fn run_stage_with_retry(
        &self,
        def: &StageDefinition,
        run: &PipelineRun,
        workspace: &Path,
        artifact: &mut Option<ArtifactReference>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> (StageOutcome, u32) {
        let max_attempts = if def.retryable {
            1 + self.retry_max_attempts
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .run_stage_once(def, run, workspace, artifact, abort_rx)
                .await;

            if let StageOutcome::Failure(reason) = outcome {
                if attempt < max_attempts {
                    warn!(
                        run_id = %run.run_id,
                        stage = %def.stage,
                        attempt,
                        reason = ?reason,
                        "Stage attempt failed, retrying"
                    );
                    continue;
                }
            }

            return (outcome, attempt);
        }
    }

    async fn run_stage_once(
        &self,
        def: &StageDefinition,
        run: &PipelineRun,
        workspace: &Path,
        artifact: &mut Option<ArtifactReference>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> StageOutcome {
        match def.stage {
            Stage::Package => {
                let outcome = self.run_command_stage(def, run, workspace, abort_rx).await;
                if !outcome.is_success() {
                    return outcome;
                }
                match self.collect_artifact(run, workspace).await {
                    Ok(reference) => {
                        *artifact = Some(reference);
                        StageOutcome::Success
                    }
                    Err(e) => {
                        error!(run_id = %run.run_id, "Failed to collect artifact: {:#}", e);
                        StageOutcome::Failure(StageFailure::CommandError)
                    }
                }
            }
            Stage::Deploy => self.run_deploy_stage(run, artifact.as_ref(), abort_rx).await,
            _ => self.run_command_stage(def, run, workspace, abort_rx).await,
        }
    }

    async fn run_command_stage(
        &self,
        def: &StageDefinition,
        run: &PipelineRun,
        workspace: &Path,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> StageOutcome {
        let Some(command) = &def.command else {
            return StageOutcome::Success;
        };

        let command = command.clone().with_env(&self.context_env(run));
        let timeout = Duration::from_secs(def.timeout_secs);

        tokio::select! {
            _ = wait_for_abort(abort_rx) => StageOutcome::Aborted,
            result = self.runner.run(&command, workspace, timeout) => match result {
                Ok(outcome) if outcome.success() => StageOutcome::Success,
                Ok(outcome) => {
                    warn!(
                        run_id = %run.run_id,
                        stage = %def.stage,
                        exit_code = outcome.exit_code,
                        "Stage command failed"
                    );
                    debug!(
                        run_id = %run.run_id,
                        stage = %def.stage,
                        stderr = %outcome.stderr.trim(),
                        "Captured stage output"
                    );
                    StageOutcome::Failure(command_failure(def.stage))
                }
                Err(AgentError::TimedOut(timeout)) => {
                    warn!(
                        run_id = %run.run_id,
                        stage = %def.stage,
                        "Stage timed out after {:?}",
                        timeout
                    );
                    StageOutcome::Failure(StageFailure::Timeout)
                }
                Err(e) => {
                    error!(run_id = %run.run_id, stage = %def.stage, "Stage execution error: {}", e);
                    StageOutcome::Failure(StageFailure::CommandError)
                }
            },
        }
    }

    async fn run_deploy_stage(
        &self,
        run: &PipelineRun,
        artifact: Option<&ArtifactReference>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> StageOutcome {
        if self.targets.is_empty() {
            debug!(run_id = %run.run_id, "No deployment targets configured");
            return StageOutcome::Success;
        }

        let Some(artifact) = artifact else {
            error!(run_id = %run.run_id, "Deploy reached without a packaged artifact");
            return StageOutcome::Failure(StageFailure::DeployFailed);
        };

        for target in &self.targets {
            let result = tokio::select! {
                _ = wait_for_abort(abort_rx) => return StageOutcome::Aborted,
                result = self.selector.deploy(artifact, target) => result,
            };

            if let Err(e) = result {
                error!(
                    run_id = %run.run_id,
                    environment = %target.environment,
                    "Deployment failed: {}",
                    e
                );
                return StageOutcome::Failure(StageFailure::DeployFailed);
            }
        }

        StageOutcome::Success
    }

    /// Reads the package stage's output and puts it in the artifact store
    async fn collect_artifact(
        &self,
        run: &PipelineRun,
        workspace: &Path,
    ) -> anyhow::Result<ArtifactReference> {
        let path = workspace.join(&self.artifact_output);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("package output {} unreadable: {}", path.display(), e))?;

        let file_name = self
            .artifact_output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let key = format!("run-{}/{}", run.run_id, file_name);

        let stored = self.store.put(&key, &bytes).await?;
        info!(
            run_id = %run.run_id,
            storage_key = %stored.storage_key,
            checksum = %stored.checksum,
            "Artifact stored"
        );

        Ok(ArtifactReference {
            run_id: run.run_id,
            storage_key: stored.storage_key,
            checksum: stored.checksum,
            created_at: chrono::Utc::now(),
        })
    }

    /// Request context injected into every stage command's environment
    fn context_env(&self, run: &PipelineRun) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "CONVEYOR_REPOSITORY".to_string(),
            run.request.repository.clone(),
        );
        env.insert(
            "CONVEYOR_REPO_URL".to_string(),
            format!("{}/{}.git", self.clone_base_url, run.request.repository),
        );
        env.insert(
            "CONVEYOR_SOURCE_REF".to_string(),
            run.request.source_ref.clone(),
        );
        env.insert(
            "CONVEYOR_COMMIT_SHA".to_string(),
            run.request.commit_sha.clone(),
        );
        env.insert("CONVEYOR_RUN_ID".to_string(), run.run_id.to_string());
        env
    }
}

fn command_failure(stage: Stage) -> StageFailure {
    if stage == Stage::Quality {
        StageFailure::QualityGateFailed
    } else {
        StageFailure::CommandError
    }
}

fn skip_record(stage: Stage) -> StageRecord {
    let now = chrono::Utc::now();
    StageRecord {
        stage,
        outcome: StageOutcome::Skipped,
        attempts: 0,
        started_at: now,
        ended_at: now,
    }
}

/// Resolves when the abort flag flips to true; pends forever otherwise
async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nothing can abort this run anymore
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CommandOutcome;
    use crate::artifact::MemoryArtifactStore;
    use crate::report::{ReportEvent, Reporter, StatusSink};
    use async_trait::async_trait;
    use conveyor_core::domain::deploy::StrategyKind;
    use conveyor_core::domain::request::{BuildRequest, TriggerEvent};
    use conveyor_core::domain::run::RunId;
    use conveyor_core::domain::stage::CommandSpec;
    use conveyor_core::dto::status::CommitState;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Per-command scripted behavior, keyed by the shell marker string
    #[derive(Clone)]
    enum Behavior {
        Succeed,
        Fail,
        /// Fail this many times, then succeed
        FailTimes(u32),
        Timeout,
        /// Never complete (until aborted)
        Block,
        /// Succeed and drop the package output into the workspace
        WriteArtifact(&'static [u8]),
    }

    struct ScriptedRunner {
        behaviors: Mutex<HashMap<String, Behavior>>,
    }

    impl ScriptedRunner {
        fn new(scripts: &[(&str, Behavior)]) -> Arc<Self> {
            Arc::new(Self {
                behaviors: Mutex::new(
                    scripts
                        .iter()
                        .map(|(marker, behavior)| (marker.to_string(), behavior.clone()))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            spec: &CommandSpec,
            workspace: &Path,
            timeout: Duration,
        ) -> Result<CommandOutcome, AgentError> {
            let marker = spec.args.last().cloned().unwrap_or_default();
            let behavior = {
                let mut behaviors = self.behaviors.lock().unwrap();
                match behaviors.get_mut(&marker) {
                    Some(Behavior::FailTimes(remaining)) => {
                        if *remaining > 0 {
                            *remaining -= 1;
                            Behavior::Fail
                        } else {
                            Behavior::Succeed
                        }
                    }
                    Some(b) => b.clone(),
                    None => Behavior::Succeed,
                }
            };

            let exit_code = match behavior {
                Behavior::Succeed => 0,
                Behavior::Fail => 1,
                Behavior::FailTimes(_) => unreachable!("resolved above"),
                Behavior::Timeout => return Err(AgentError::TimedOut(timeout)),
                Behavior::Block => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Behavior::WriteArtifact(bytes) => {
                    std::fs::write(workspace.join("app.tar.gz"), bytes).unwrap();
                    0
                }
            };

            Ok(CommandOutcome {
                exit_code,
                stdout: String::new(),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "scripted failure".to_string()
                },
                duration: Duration::from_millis(1),
            })
        }
    }

    struct RecordingSink {
        events: Mutex<Vec<ReportEvent>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn terminal_state(&self) -> Option<CommitState> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find_map(|e| match e {
                    ReportEvent::CommitStatus { status, .. } => Some(status.state),
                    _ => None,
                })
        }

        fn notification_count(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, ReportEvent::Notification(_)))
                .count()
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, event: &ReportEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn stage_def(stage: Stage, marker: &str, policy: FailurePolicy, retryable: bool) -> StageDefinition {
        StageDefinition {
            stage,
            command: Some(CommandSpec::shell(marker)),
            retryable,
            timeout_secs: 60,
            failure_policy: policy,
        }
    }

    fn request() -> BuildRequest {
        BuildRequest {
            id: Uuid::new_v4(),
            repository: "acme/app".to_string(),
            source_ref: "main".to_string(),
            commit_sha: "def456".to_string(),
            trigger: TriggerEvent::Push,
            received_at: chrono::Utc::now(),
            payload_digest: "0".repeat(64),
        }
    }

    struct Harness {
        executor: Arc<PipelineExecutor>,
        registry: Arc<RunRegistry>,
        sink: Arc<RecordingSink>,
        _workspace: tempfile::TempDir,
    }

    fn harness(config_stages: Vec<StageDefinition>, runner: Arc<ScriptedRunner>) -> Harness {
        harness_with(config_stages, Vec::new(), runner, 2)
    }

    fn harness_with(
        config_stages: Vec<StageDefinition>,
        targets: Vec<DeploymentTarget>,
        runner: Arc<ScriptedRunner>,
        retry_max_attempts: u32,
    ) -> Harness {
        let workspace = tempfile::tempdir().unwrap();

        let mut config = Config::new("secret".to_string());
        config.stages = config_stages;
        config.targets = targets;
        config.retry_max_attempts = retry_max_attempts;
        config.workspace_base = workspace.path().to_path_buf();
        config.artifact_output = PathBuf::from("app.tar.gz");
        config.health_check_attempts = 2;

        let registry = Arc::new(RunRegistry::new());
        let sink = RecordingSink::new();
        let (reporter, _worker) = Reporter::start(vec![sink.clone() as Arc<dyn StatusSink>], 3);
        let selector = Arc::new(StrategySelector::new(
            runner.clone() as Arc<dyn CommandRunner>,
            &config,
        ));

        let executor = Arc::new(PipelineExecutor::new(
            &config,
            runner,
            Arc::new(MemoryArtifactStore::new()),
            selector,
            reporter,
            registry.clone(),
        ));

        Harness {
            executor,
            registry,
            sink,
            _workspace: workspace,
        }
    }

    async fn run_to_completion(harness: &Harness) -> PipelineRun {
        let run = PipelineRun::new(RunId(1), request(), "agent-0".to_string());
        let abort_rx = harness.registry.register(run.clone());
        harness.executor.execute(run, abort_rx).await;
        // reporter worker drains asynchronously
        tokio::task::yield_now().await;
        harness.registry.get(RunId(1)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_succeeds_through_all_stages() {
        let runner = ScriptedRunner::new(&[("package", Behavior::WriteArtifact(b"bundle"))]);
        let harness = harness(
            vec![
                stage_def(Stage::Checkout, "checkout", FailurePolicy::AbortPipeline, true),
                stage_def(Stage::Build, "build", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Test, "test", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Package, "package", FailurePolicy::AbortPipeline, false),
            ],
            runner,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        let outcomes: Vec<StageOutcome> =
            run.stage_history.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![StageOutcome::Success; 5]); // incl. notify
        assert_eq!(run.stage_history.last().unwrap().stage, Stage::Notify);
        assert_eq!(harness.sink.terminal_state(), Some(CommitState::Success));
        assert_eq!(harness.sink.notification_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_policy_failure_still_reaches_later_stages() {
        let runner = ScriptedRunner::new(&[
            ("quality", Behavior::Fail),
            ("package", Behavior::WriteArtifact(b"bundle")),
        ]);
        let harness = harness(
            vec![
                stage_def(Stage::Build, "build", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Quality, "quality", FailurePolicy::ContinueWithWarning, false),
                stage_def(Stage::Package, "package", FailurePolicy::AbortPipeline, false),
            ],
            runner,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(
            run.outcome_of(Stage::Quality),
            Some(StageOutcome::Failure(StageFailure::QualityGateFailed))
        );
        assert_eq!(run.outcome_of(Stage::Package), Some(StageOutcome::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_policy_failure_skips_to_failed_then_notifies() {
        let runner = ScriptedRunner::new(&[("build", Behavior::Fail)]);
        let harness = harness(
            vec![
                stage_def(Stage::Checkout, "checkout", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Build, "build", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Test, "test", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Package, "package", FailurePolicy::AbortPipeline, false),
            ],
            runner,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.outcome_of(Stage::Build),
            Some(StageOutcome::Failure(StageFailure::CommandError))
        );
        assert_eq!(run.outcome_of(Stage::Test), Some(StageOutcome::Skipped));
        assert_eq!(run.outcome_of(Stage::Package), Some(StageOutcome::Skipped));
        // notify still ran and reported the failure
        assert_eq!(run.outcome_of(Stage::Notify), Some(StageOutcome::Success));
        assert_eq!(harness.sink.terminal_state(), Some(CommitState::Failure));
        assert_eq!(harness.sink.notification_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_stage_recovers_within_retry_limit() {
        let runner = ScriptedRunner::new(&[("checkout", Behavior::FailTimes(2))]);
        let harness = harness(
            vec![stage_def(
                Stage::Checkout,
                "checkout",
                FailurePolicy::AbortPipeline,
                true,
            )],
            runner,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        let record = &run.stage_history[0];
        assert_eq!(record.outcome, StageOutcome::Success);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_a_hard_failure() {
        let runner = ScriptedRunner::new(&[("checkout", Behavior::Fail)]);
        let harness = harness(
            vec![stage_def(
                Stage::Checkout,
                "checkout",
                FailurePolicy::AbortPipeline,
                true,
            )],
            runner,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Failed);
        let record = &run.stage_history[0];
        assert_eq!(
            record.outcome,
            StageOutcome::Failure(StageFailure::CommandError)
        );
        assert_eq!(record.attempts, 3); // 1 + retry_max_attempts
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_as_timeout_failure() {
        let runner = ScriptedRunner::new(&[("build", Behavior::Timeout)]);
        let harness = harness(
            vec![stage_def(Stage::Build, "build", FailurePolicy::AbortPipeline, false)],
            runner,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.outcome_of(Stage::Build),
            Some(StageOutcome::Failure(StageFailure::Timeout))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_signal_cancels_in_flight_stage() {
        let runner = ScriptedRunner::new(&[("build", Behavior::Block)]);
        let harness = harness(
            vec![
                stage_def(Stage::Checkout, "checkout", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Build, "build", FailurePolicy::AbortPipeline, false),
                stage_def(Stage::Test, "test", FailurePolicy::AbortPipeline, false),
            ],
            runner,
        );

        let run = PipelineRun::new(RunId(1), request(), "agent-0".to_string());
        let abort_rx = harness.registry.register(run.clone());
        let executor = harness.executor.clone();
        let task = tokio::spawn(async move { executor.execute(run, abort_rx).await });

        // let the run park inside the build stage, then signal
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.registry.abort(RunId(1));
        task.await.unwrap();

        let run = harness.registry.get(RunId(1)).unwrap();
        assert_eq!(run.status, RunStatus::Aborted);
        assert_eq!(run.outcome_of(Stage::Build), Some(StageOutcome::Aborted));
        assert_eq!(run.outcome_of(Stage::Test), Some(StageOutcome::Skipped));
        assert_eq!(run.outcome_of(Stage::Notify), Some(StageOutcome::Success));

        tokio::task::yield_now().await;
        assert_eq!(harness.sink.terminal_state(), Some(CommitState::Failure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_health_failure_fails_the_run() {
        let runner = ScriptedRunner::new(&[
            ("package", Behavior::WriteArtifact(b"bundle")),
            ("probe-app", Behavior::Fail),
        ]);
        let target = DeploymentTarget {
            environment: "staging".to_string(),
            strategy: StrategyKind::Ssh,
            params: [
                ("host", "10.0.0.5"),
                ("remote_path", "/srv/app"),
                ("health_command", "probe-app"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            health_url: None,
        };
        let harness = harness_with(
            vec![
                stage_def(Stage::Package, "package", FailurePolicy::AbortPipeline, false),
                StageDefinition {
                    stage: Stage::Deploy,
                    command: None,
                    retryable: false,
                    timeout_secs: 60,
                    failure_policy: FailurePolicy::AbortPipeline,
                },
            ],
            vec![target],
            runner,
            0,
        );

        let run = run_to_completion(&harness).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.outcome_of(Stage::Deploy),
            Some(StageOutcome::Failure(StageFailure::DeployFailed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_without_targets_is_a_no_op() {
        let runner = ScriptedRunner::new(&[("package", Behavior::WriteArtifact(b"bundle"))]);
        let harness = harness(
            vec![
                stage_def(Stage::Package, "package", FailurePolicy::AbortPipeline, false),
                StageDefinition {
                    stage: Stage::Deploy,
                    command: None,
                    retryable: false,
                    timeout_secs: 60,
                    failure_policy: FailurePolicy::AbortPipeline,
                },
            ],
            runner,
        );

        let run = run_to_completion(&harness).await;
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.outcome_of(Stage::Deploy), Some(StageOutcome::Success));
    }
}
