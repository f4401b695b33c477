//! Deployment strategy selector
//!
//! The deploy stage hands an artifact and a target to the selector, which
//! dispatches on the target's strategy kind. All strategies share one
//! contract: deploy, rollback, health check. Strategies drive their
//! external tools (scp, aws, podman, ansible-playbook) through the same
//! [`CommandRunner`] seam the pipeline stages use, so they stay testable
//! without touching the network.
//!
//! Rollback semantics: strategies with a native rollback path override
//! [`DeployStrategy::rollback`]; the default degrades to redeploying the
//! previous artifact reference. The selector tracks, per environment, the
//! currently live and previously live references to make both paths work.

pub mod codedeploy;
pub mod config_mgmt;
pub mod container;
pub mod s3;
pub mod ssh;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::{DeployResult, DeployStatus, DeploymentTarget, StrategyKind};
use conveyor_core::domain::stage::CommandSpec;

use crate::agent::CommandRunner;
use crate::config::Config;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment target {environment} missing parameter {key}")]
    MissingParameter { environment: String, key: String },

    #[error("deployment command failed: {0}")]
    Command(String),

    #[error("health check failed after {attempts} attempts")]
    HealthCheckFailed { attempts: u32 },

    #[error("no previous artifact recorded for environment {0}")]
    NoPreviousArtifact(String),

    #[error("unknown deployment environment: {0}")]
    UnknownEnvironment(String),
}

/// Contract shared by all deployment backends
#[async_trait]
pub trait DeployStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError>;

    /// Restores a previously deployed artifact
    ///
    /// Default: redeploy the previous reference. Strategies with a cheaper
    /// native path (container, codedeploy) override this.
    async fn rollback(
        &self,
        previous: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        self.deploy(previous, target).await
    }

    /// Single post-deploy verification probe; the selector handles retries
    async fn health_check(&self, target: &DeploymentTarget) -> bool;
}

/// Shared handles for strategy implementations
pub(crate) struct StrategyContext {
    runner: Arc<dyn CommandRunner>,
    http: reqwest::Client,
    work_dir: PathBuf,
    command_timeout: Duration,
}

impl StrategyContext {
    /// Runs a deployment command, mapping any failure into [`DeployError`]
    pub(crate) async fn run(&self, spec: CommandSpec) -> Result<(), DeployError> {
        self.run_capture(spec).await.map(|_| ())
    }

    /// Runs a deployment command and returns its trimmed stdout
    pub(crate) async fn run_capture(&self, spec: CommandSpec) -> Result<String, DeployError> {
        let outcome = self
            .runner
            .run(&spec, &self.work_dir, self.command_timeout)
            .await
            .map_err(|e| DeployError::Command(e.to_string()))?;

        if !outcome.success() {
            return Err(DeployError::Command(format!(
                "{} exited with {}: {}",
                spec.program,
                outcome.exit_code,
                outcome.stderr.trim()
            )));
        }

        Ok(outcome.stdout.trim().to_string())
    }

    /// One health probe against the target
    ///
    /// Prefers a target-supplied probe command, falls back to an HTTP GET
    /// against the health URL. Targets that configure neither are treated
    /// as healthy once their deploy commands succeed.
    pub(crate) async fn probe(&self, target: &DeploymentTarget) -> bool {
        if let Some(command) = target.param("health_command") {
            return match self
                .runner
                .run(
                    &CommandSpec::shell(command),
                    &self.work_dir,
                    self.command_timeout,
                )
                .await
            {
                Ok(outcome) => outcome.success(),
                Err(_) => false,
            };
        }

        if let Some(url) = &target.health_url {
            return match self.http.get(url).send().await {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            };
        }

        debug!(
            environment = %target.environment,
            "No health probe configured, treating deploy as healthy"
        );
        true
    }
}

/// Fetches a required connection parameter from the target
pub(crate) fn required_param<'a>(
    target: &'a DeploymentTarget,
    key: &str,
) -> Result<&'a str, DeployError> {
    target.param(key).ok_or_else(|| DeployError::MissingParameter {
        environment: target.environment.clone(),
        key: key.to_string(),
    })
}

/// Live/previous artifact bookkeeping for one environment
#[derive(Debug, Clone, Default)]
struct EnvState {
    current: Option<ArtifactReference>,
    previous: Option<ArtifactReference>,
}

/// Dispatches deploy/rollback operations to the strategy for a target
pub struct StrategySelector {
    ssh: ssh::SshStrategy,
    s3: s3::S3PullStrategy,
    codedeploy: codedeploy::CodeDeployStrategy,
    container: container::ContainerStrategy,
    config_mgmt: config_mgmt::ConfigMgmtStrategy,
    state: Mutex<HashMap<String, EnvState>>,
    health_attempts: u32,
    health_interval: Duration,
}

impl StrategySelector {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        let ctx = Arc::new(StrategyContext {
            runner,
            http: reqwest::Client::new(),
            work_dir: config.workspace_base.join("deploy"),
            command_timeout: config.deploy_command_timeout,
        });

        Self {
            ssh: ssh::SshStrategy::new(Arc::clone(&ctx)),
            s3: s3::S3PullStrategy::new(Arc::clone(&ctx)),
            codedeploy: codedeploy::CodeDeployStrategy::new(Arc::clone(&ctx)),
            container: container::ContainerStrategy::new(Arc::clone(&ctx)),
            config_mgmt: config_mgmt::ConfigMgmtStrategy::new(ctx),
            state: Mutex::new(HashMap::new()),
            health_attempts: config.health_check_attempts,
            health_interval: config.health_check_interval,
        }
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn DeployStrategy {
        match kind {
            StrategyKind::Ssh => &self.ssh,
            StrategyKind::S3Pull => &self.s3,
            StrategyKind::CodeDeploy => &self.codedeploy,
            StrategyKind::Container => &self.container,
            StrategyKind::ConfigMgmt => &self.config_mgmt,
        }
    }

    /// Deploys the artifact to the target and verifies it with the health
    /// probe. A deploy whose probe never passes triggers exactly one
    /// automatic rollback attempt to the previously live artifact.
    pub async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<DeployResult, DeployError> {
        let strategy = self.strategy(target.strategy);
        let prior = self.current(&target.environment);

        info!(
            environment = %target.environment,
            strategy = %target.strategy,
            storage_key = %artifact.storage_key,
            "Deploying artifact"
        );

        strategy.deploy(artifact, target).await?;

        if self.probe_until_healthy(strategy, target).await {
            self.record_deploy(&target.environment, artifact.clone());
            return Ok(DeployResult {
                status: DeployStatus::Succeeded,
                deployed_at: chrono::Utc::now(),
                previous_artifact: prior,
            });
        }

        warn!(
            environment = %target.environment,
            attempts = self.health_attempts,
            "Health check exhausted, deployment failed"
        );

        match &prior {
            Some(previous) => match self.restore(strategy, previous, target).await {
                Ok(true) => info!(
                    environment = %target.environment,
                    storage_key = %previous.storage_key,
                    "Rolled back to previous artifact"
                ),
                Ok(false) => error!(
                    environment = %target.environment,
                    "Rollback applied but its health check did not pass"
                ),
                Err(e) => error!(
                    environment = %target.environment,
                    "Rollback attempt failed: {}",
                    e
                ),
            },
            None => warn!(
                environment = %target.environment,
                "No previous artifact to roll back to"
            ),
        }

        Err(DeployError::HealthCheckFailed {
            attempts: self.health_attempts,
        })
    }

    /// Restores the previously live artifact for the target's environment
    pub async fn rollback(&self, target: &DeploymentTarget) -> Result<DeployResult, DeployError> {
        let strategy = self.strategy(target.strategy);
        let previous = self
            .previous(&target.environment)
            .ok_or_else(|| DeployError::NoPreviousArtifact(target.environment.clone()))?;

        info!(
            environment = %target.environment,
            storage_key = %previous.storage_key,
            "Rolling back to previous artifact"
        );

        if !self.restore(strategy, &previous, target).await? {
            return Err(DeployError::HealthCheckFailed {
                attempts: self.health_attempts,
            });
        }

        let displaced = self.record_rollback(&target.environment);
        Ok(DeployResult {
            status: DeployStatus::RolledBack,
            deployed_at: chrono::Utc::now(),
            previous_artifact: displaced,
        })
    }

    /// The artifact currently live in an environment, if any
    pub fn current(&self, environment: &str) -> Option<ArtifactReference> {
        self.state
            .lock()
            .unwrap()
            .get(environment)
            .and_then(|s| s.current.clone())
    }

    fn previous(&self, environment: &str) -> Option<ArtifactReference> {
        self.state
            .lock()
            .unwrap()
            .get(environment)
            .and_then(|s| s.previous.clone())
    }

    async fn restore(
        &self,
        strategy: &dyn DeployStrategy,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<bool, DeployError> {
        strategy.rollback(artifact, target).await?;
        Ok(self.probe_until_healthy(strategy, target).await)
    }

    async fn probe_until_healthy(
        &self,
        strategy: &dyn DeployStrategy,
        target: &DeploymentTarget,
    ) -> bool {
        for attempt in 1..=self.health_attempts {
            if strategy.health_check(target).await {
                debug!(
                    environment = %target.environment,
                    attempt,
                    "Health check passed"
                );
                return true;
            }
            if attempt < self.health_attempts {
                tokio::time::sleep(self.health_interval).await;
            }
        }
        false
    }

    fn record_deploy(&self, environment: &str, artifact: ArtifactReference) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(environment.to_string()).or_default();
        entry.previous = entry.current.take();
        entry.current = Some(artifact);
    }

    /// Swaps current and previous, returning the displaced current
    fn record_rollback(&self, environment: &str) -> Option<ArtifactReference> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(environment.to_string()).or_default();
        std::mem::swap(&mut entry.current, &mut entry.previous);
        entry.previous.clone()
    }
}
