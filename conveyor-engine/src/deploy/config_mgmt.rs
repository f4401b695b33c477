//! Declarative config-apply deployment
//!
//! Runs the configuration-management engine with the artifact pinned as a
//! variable; the playbook converges hosts onto it. Rollback degrades to
//! re-applying with the previous artifact pinned.

use async_trait::async_trait;
use std::sync::Arc;

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::{DeploymentTarget, StrategyKind};
use conveyor_core::domain::stage::CommandSpec;

use super::{required_param, DeployError, DeployStrategy, StrategyContext};

pub struct ConfigMgmtStrategy {
    ctx: Arc<StrategyContext>,
}

impl ConfigMgmtStrategy {
    pub(crate) fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl DeployStrategy for ConfigMgmtStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ConfigMgmt
    }

    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        let playbook = required_param(target, "playbook")?;
        let inventory = required_param(target, "inventory")?;

        self.ctx
            .run(CommandSpec::new(
                "ansible-playbook",
                vec![
                    "-i".to_string(),
                    inventory.to_string(),
                    playbook.to_string(),
                    "-e".to_string(),
                    format!("artifact_path={}", artifact.storage_key),
                    "-e".to_string(),
                    format!("artifact_checksum={}", artifact.checksum),
                ],
            ))
            .await
    }

    async fn health_check(&self, target: &DeploymentTarget) -> bool {
        self.ctx.probe(target).await
    }
}
