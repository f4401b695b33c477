//! Container pull-and-run deployment
//!
//! Loads the artifact (an image archive) into the local container store,
//! replaces the running container, and tags by artifact checksum. Rollback
//! is native: the previous image is still in the store, so restoring it is
//! a stop-and-run without reloading the archive.

use async_trait::async_trait;
use std::sync::Arc;

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::{DeploymentTarget, StrategyKind};
use conveyor_core::domain::stage::CommandSpec;

use super::{required_param, DeployError, DeployStrategy, StrategyContext};

pub struct ContainerStrategy {
    ctx: Arc<StrategyContext>,
}

impl ContainerStrategy {
    pub(crate) fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    /// Image tag derived from the artifact checksum
    fn tag(artifact: &ArtifactReference) -> &str {
        artifact.checksum.get(..12).unwrap_or(&artifact.checksum)
    }

    fn container_name<'a>(target: &'a DeploymentTarget) -> &'a str {
        target.param("container_name").unwrap_or(&target.environment)
    }

    /// Replaces the running container with the given image tag
    async fn run_container(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        let image = required_param(target, "image")?;
        let name = Self::container_name(target);

        self.ctx
            .run(CommandSpec::shell(format!("podman rm -f {} || true", name)))
            .await?;

        self.ctx
            .run(CommandSpec::new(
                "podman",
                vec![
                    "run".to_string(),
                    "-d".to_string(),
                    "--name".to_string(),
                    name.to_string(),
                    format!("{}:{}", image, Self::tag(artifact)),
                ],
            ))
            .await
    }
}

#[async_trait]
impl DeployStrategy for ContainerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Container
    }

    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        self.ctx
            .run(CommandSpec::new(
                "podman",
                vec!["load".to_string(), "-i".to_string(), artifact.storage_key.clone()],
            ))
            .await?;

        self.run_container(artifact, target).await
    }

    async fn rollback(
        &self,
        previous: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        // Previous image is already loaded; just swap the container
        self.run_container(previous, target).await
    }

    async fn health_check(&self, target: &DeploymentTarget) -> bool {
        self.ctx.probe(target).await
    }
}
