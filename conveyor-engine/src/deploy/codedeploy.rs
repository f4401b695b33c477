//! Managed-rollout deployment
//!
//! Uploads the bundle to the revision bucket, creates a deployment through
//! the rollout service, and waits for its lifecycle to complete. Rollback
//! is native: the previous revision's bundle is already in the bucket, so a
//! rollback re-points the deployment group at it without re-uploading.

use async_trait::async_trait;
use std::sync::Arc;

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::{DeploymentTarget, StrategyKind};
use conveyor_core::domain::stage::CommandSpec;
use tracing::info;

use super::{required_param, DeployError, DeployStrategy, StrategyContext};

pub struct CodeDeployStrategy {
    ctx: Arc<StrategyContext>,
}

impl CodeDeployStrategy {
    pub(crate) fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    fn bundle_key(artifact: &ArtifactReference) -> String {
        format!("releases/{}.tar.gz", artifact.checksum)
    }

    /// Creates a deployment for the given bundle and waits for it to finish
    async fn roll_out(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        let application = required_param(target, "application")?;
        let group = required_param(target, "deployment_group")?;
        let bucket = required_param(target, "bucket")?;

        let deployment_id = self
            .ctx
            .run_capture(CommandSpec::new(
                "aws",
                vec![
                    "deploy".to_string(),
                    "create-deployment".to_string(),
                    "--application-name".to_string(),
                    application.to_string(),
                    "--deployment-group-name".to_string(),
                    group.to_string(),
                    "--s3-location".to_string(),
                    format!(
                        "bucket={},key={},bundleType=tgz",
                        bucket,
                        Self::bundle_key(artifact)
                    ),
                    "--query".to_string(),
                    "deploymentId".to_string(),
                    "--output".to_string(),
                    "text".to_string(),
                ],
            ))
            .await?;

        info!(
            environment = %target.environment,
            deployment_id = %deployment_id,
            "Waiting for managed rollout"
        );

        self.ctx
            .run(CommandSpec::new(
                "aws",
                vec![
                    "deploy".to_string(),
                    "wait".to_string(),
                    "deployment-successful".to_string(),
                    "--deployment-id".to_string(),
                    deployment_id,
                ],
            ))
            .await
    }
}

#[async_trait]
impl DeployStrategy for CodeDeployStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CodeDeploy
    }

    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        let bucket = required_param(target, "bucket")?;

        self.ctx
            .run(CommandSpec::new(
                "aws",
                vec![
                    "s3".to_string(),
                    "cp".to_string(),
                    artifact.storage_key.clone(),
                    format!("s3://{}/{}", bucket, Self::bundle_key(artifact)),
                ],
            ))
            .await?;

        self.roll_out(artifact, target).await
    }

    async fn rollback(
        &self,
        previous: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        // The previous bundle is still in the bucket; skip the upload
        self.roll_out(previous, target).await
    }

    async fn health_check(&self, target: &DeploymentTarget) -> bool {
        self.ctx.probe(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testing::{artifact, selector, target, RecordingRunner};

    fn codedeploy_target() -> DeploymentTarget {
        target(
            "production",
            StrategyKind::CodeDeploy,
            &[
                ("application", "acme-app"),
                ("deployment_group", "prod-fleet"),
                ("bucket", "acme-releases"),
            ],
        )
    }

    #[tokio::test]
    async fn test_deploy_uploads_creates_and_waits() {
        let runner = RecordingRunner::new();
        let sel = selector(runner.clone(), 1);

        sel.deploy(&artifact(1, "/artifacts/app.tar.gz"), &codedeploy_target())
            .await
            .unwrap();

        let commands = runner.rendered();
        assert!(commands[0].starts_with("aws s3 cp /artifacts/app.tar.gz s3://acme-releases/releases/"));
        assert!(commands[1].contains("create-deployment"));
        assert!(commands[1].contains("--application-name acme-app"));
        assert!(commands[1].contains("bundleType=tgz"));
        // deployment id captured from create-deployment stdout
        assert!(commands[2].contains("wait deployment-successful --deployment-id ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_skips_upload() {
        let runner = RecordingRunner::new();
        let sel = selector(runner.clone(), 1);
        let target = codedeploy_target();

        sel.deploy(&artifact(1, "/artifacts/a.tar.gz"), &target)
            .await
            .unwrap();
        sel.deploy(&artifact(2, "/artifacts/b.tar.gz"), &target)
            .await
            .unwrap();
        runner.commands.lock().unwrap().clear();

        sel.rollback(&target).await.unwrap();

        let commands = runner.rendered();
        assert!(commands.iter().all(|c| !c.contains("s3 cp")));
        assert!(commands[0].contains("create-deployment"));
    }
}
