//! Direct-copy deployment over SSH
//!
//! Copies the artifact to the target host with scp, then optionally runs a
//! restart command. No native rollback: restoring a previous artifact is a
//! redeploy of its reference.

use async_trait::async_trait;
use std::sync::Arc;

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::{DeploymentTarget, StrategyKind};
use conveyor_core::domain::stage::CommandSpec;

use super::{required_param, DeployError, DeployStrategy, StrategyContext};

pub struct SshStrategy {
    ctx: Arc<StrategyContext>,
}

impl SshStrategy {
    pub(crate) fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    fn login(target: &DeploymentTarget) -> Result<String, DeployError> {
        let host = required_param(target, "host")?;
        let user = target.param("user").unwrap_or("deploy");
        Ok(format!("{}@{}", user, host))
    }
}

#[async_trait]
impl DeployStrategy for SshStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ssh
    }

    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        let login = Self::login(target)?;
        let remote_path = required_param(target, "remote_path")?;

        self.ctx
            .run(CommandSpec::new(
                "scp",
                vec![
                    artifact.storage_key.clone(),
                    format!("{}:{}", login, remote_path),
                ],
            ))
            .await?;

        if let Some(restart) = target.param("restart_command") {
            self.ctx
                .run(CommandSpec::new("ssh", vec![login, restart.to_string()]))
                .await?;
        }

        Ok(())
    }

    async fn health_check(&self, target: &DeploymentTarget) -> bool {
        self.ctx.probe(target).await
    }
}
