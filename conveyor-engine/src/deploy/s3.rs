//! Pull-from-storage deployment
//!
//! Uploads the artifact to an object storage bucket, then optionally
//! instructs the target host to pull and install it. Rollback degrades to
//! redeploying the previous reference (its bundle is re-uploaded under its
//! own checksum key, which the storage backend deduplicates).

use async_trait::async_trait;
use std::sync::Arc;

use conveyor_core::domain::artifact::ArtifactReference;
use conveyor_core::domain::deploy::{DeploymentTarget, StrategyKind};
use conveyor_core::domain::stage::CommandSpec;

use super::{required_param, DeployError, DeployStrategy, StrategyContext};

pub struct S3PullStrategy {
    ctx: Arc<StrategyContext>,
}

impl S3PullStrategy {
    pub(crate) fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    fn object_url(artifact: &ArtifactReference, target: &DeploymentTarget) -> Result<String, DeployError> {
        let bucket = required_param(target, "bucket")?;
        let prefix = target.param("prefix").unwrap_or("artifacts");
        Ok(format!("s3://{}/{}/{}.tar.gz", bucket, prefix, artifact.checksum))
    }
}

#[async_trait]
impl DeployStrategy for S3PullStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::S3Pull
    }

    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        target: &DeploymentTarget,
    ) -> Result<(), DeployError> {
        let object_url = Self::object_url(artifact, target)?;

        self.ctx
            .run(CommandSpec::new(
                "aws",
                vec![
                    "s3".to_string(),
                    "cp".to_string(),
                    artifact.storage_key.clone(),
                    object_url.clone(),
                ],
            ))
            .await?;

        // Tell the host to pull the fresh bundle, when the target knows how
        if let (Some(host), Some(pull)) = (target.param("pull_host"), target.param("pull_command")) {
            self.ctx
                .run(CommandSpec::new(
                    "ssh",
                    vec![host.to_string(), format!("{} {}", pull, object_url)],
                ))
                .await?;
        }

        Ok(())
    }

    async fn health_check(&self, target: &DeploymentTarget) -> bool {
        self.ctx.probe(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testing::{artifact, selector, target, RecordingRunner};

    #[tokio::test]
    async fn test_deploy_uploads_under_checksum_key() {
        let runner = RecordingRunner::new();
        let sel = selector(runner.clone(), 1);
        let target = target(
            "staging",
            StrategyKind::S3Pull,
            &[("bucket", "acme-releases"), ("prefix", "app")],
        );

        let a = artifact(1, "/artifacts/app.tar.gz");
        sel.deploy(&a, &target).await.unwrap();

        let commands = runner.rendered();
        assert_eq!(
            commands[0],
            format!(
                "aws s3 cp /artifacts/app.tar.gz s3://acme-releases/app/{}.tar.gz",
                a.checksum
            )
        );
    }

    #[tokio::test]
    async fn test_deploy_triggers_remote_pull() {
        let runner = RecordingRunner::new();
        let sel = selector(runner.clone(), 1);
        let target = target(
            "staging",
            StrategyKind::S3Pull,
            &[
                ("bucket", "acme-releases"),
                ("pull_host", "web-1.internal"),
                ("pull_command", "/usr/local/bin/pull-release"),
            ],
        );

        sel.deploy(&artifact(1, "/artifacts/app.tar.gz"), &target)
            .await
            .unwrap();

        let commands = runner.rendered();
        assert!(commands[1].starts_with("ssh web-1.internal /usr/local/bin/pull-release s3://"));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_rejected() {
        let runner = RecordingRunner::new();
        let sel = selector(runner, 1);
        let target = target("staging", StrategyKind::S3Pull, &[]);

        let result = sel.deploy(&artifact(1, "/artifacts/app.tar.gz"), &target).await;
        assert!(matches!(
            result,
            Err(DeployError::MissingParameter { ref key, .. }) if key == "bucket"
        ));
    }
}
