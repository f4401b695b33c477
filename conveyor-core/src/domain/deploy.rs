//! Deployment domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::artifact::ArtifactReference;

/// Deployment strategy selector tag
///
/// Adding a new kind means adding a variant here and a strategy module in
/// the engine; call sites never branch on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Ssh,
    S3Pull,
    CodeDeploy,
    Container,
    ConfigMgmt,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Ssh => "ssh",
            StrategyKind::S3Pull => "s3_pull",
            StrategyKind::CodeDeploy => "codedeploy",
            StrategyKind::Container => "container",
            StrategyKind::ConfigMgmt => "config_mgmt",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One deployable environment
///
/// Read-only configuration, resolved by environment name at deploy-stage
/// entry. `params` carries the strategy-specific connection parameters
/// (host, bucket, application name, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub environment: String,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// URL probed by the post-deploy health check, when HTTP-checkable
    #[serde(default)]
    pub health_url: Option<String>,
}

impl DeploymentTarget {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Terminal state of a deploy or rollback operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Succeeded,
    RolledBack,
}

/// Result of a deploy or rollback operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub status: DeployStatus,
    pub deployed_at: chrono::DateTime<chrono::Utc>,
    /// Reference that was live before this operation, if any
    pub previous_artifact: Option<ArtifactReference>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_names() {
        assert_eq!(StrategyKind::Ssh.name(), "ssh");
        assert_eq!(StrategyKind::S3Pull.name(), "s3_pull");
        assert_eq!(StrategyKind::CodeDeploy.name(), "codedeploy");
        assert_eq!(StrategyKind::Container.name(), "container");
        assert_eq!(StrategyKind::ConfigMgmt.name(), "config_mgmt");
    }

    #[test]
    fn test_target_param_lookup() {
        let mut params = HashMap::new();
        params.insert("host".to_string(), "10.0.0.5".to_string());
        let target = DeploymentTarget {
            environment: "staging".to_string(),
            strategy: StrategyKind::Ssh,
            params,
            health_url: None,
        };

        assert_eq!(target.param("host"), Some("10.0.0.5"));
        assert_eq!(target.param("user"), None);
    }
}
