//! Engine configuration
//!
//! Defines all configurable parameters for the engine including the
//! coalescing window, agent pool sizing, retry policies, and the stage
//! plan and deployment targets.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use conveyor_core::domain::deploy::DeploymentTarget;
use conveyor_core::domain::request::TriggerEvent;
use conveyor_core::domain::stage::{CommandSpec, FailurePolicy, Stage, StageDefinition};

/// Engine configuration
///
/// All timeouts and bounds are configurable to allow tuning for different
/// deployment scenarios (dev vs prod, fast vs slow build hosts).
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret used to verify inbound webhook signatures
    pub webhook_secret: String,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Quiet period before a coalesced request is handed to the scheduler
    pub debounce_window: Duration,

    /// Number of concurrent pipeline runs (size of the agent pool)
    pub agent_pool_capacity: usize,

    /// Bound on the scheduler's ready queue; the oldest entry is dropped
    /// when a new arrival would exceed it
    pub ready_queue_max_depth: usize,

    /// Extra executions allowed for a retryable stage after its first failure
    pub retry_max_attempts: u32,

    /// Post-deploy health probe attempts before a deploy is declared failed
    pub health_check_attempts: u32,

    /// Delay between health probe attempts
    pub health_check_interval: Duration,

    /// Delivery attempts per status/notification event before UNDELIVERED
    pub report_max_attempts: u32,

    /// Timeout for commands issued by deployment strategies
    pub deploy_command_timeout: Duration,

    /// Base directory for per-run workspaces
    pub workspace_base: PathBuf,

    /// Directory backing the local artifact store
    pub artifact_dir: PathBuf,

    /// Path, relative to the workspace, where the package stage leaves its output
    pub artifact_output: PathBuf,

    /// Base URL that repository names are joined to for checkout
    pub clone_base_url: String,

    /// Event kinds that create build requests; everything else is filtered
    pub triggers: Vec<TriggerEvent>,

    /// Ordered stage plan executed for every run
    pub stages: Vec<StageDefinition>,

    /// Environments the deploy stage applies artifacts to
    pub targets: Vec<DeploymentTarget>,

    /// Commit status API endpoint, e.g. "https://api.github.example/repos"
    pub commit_status_url: Option<String>,

    /// Notification channel endpoint
    pub notification_url: Option<String>,
}

impl Config {
    /// Creates a configuration with defaults for everything but the secret
    pub fn new(webhook_secret: String) -> Self {
        Self {
            webhook_secret,
            bind_addr: "0.0.0.0:8080".to_string(),
            debounce_window: Duration::from_secs(3),
            agent_pool_capacity: 2,
            ready_queue_max_depth: 64,
            retry_max_attempts: 2,
            health_check_attempts: 10,
            health_check_interval: Duration::from_secs(5),
            report_max_attempts: 5,
            deploy_command_timeout: Duration::from_secs(300),
            workspace_base: PathBuf::from("/tmp/conveyor/workspaces"),
            artifact_dir: PathBuf::from("/tmp/conveyor/artifacts"),
            artifact_output: PathBuf::from("dist/app.tar.gz"),
            clone_base_url: "https://github.com".to_string(),
            triggers: vec![TriggerEvent::Push],
            stages: default_stage_plan(),
            targets: Vec::new(),
            commit_status_url: None,
            notification_url: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONVEYOR_WEBHOOK_SECRET (required)
    /// - CONVEYOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - CONVEYOR_DEBOUNCE_WINDOW_SECS (optional, default: 3)
    /// - CONVEYOR_AGENT_POOL_CAPACITY (optional, default: 2)
    /// - CONVEYOR_READY_QUEUE_MAX_DEPTH (optional, default: 64)
    /// - CONVEYOR_RETRY_MAX_ATTEMPTS (optional, default: 2)
    /// - CONVEYOR_HEALTH_CHECK_ATTEMPTS (optional, default: 10)
    /// - CONVEYOR_HEALTH_CHECK_INTERVAL_SECS (optional, default: 5)
    /// - CONVEYOR_REPORT_MAX_ATTEMPTS (optional, default: 5)
    /// - CONVEYOR_WORKSPACE_BASE / CONVEYOR_ARTIFACT_DIR (optional)
    /// - CONVEYOR_TRIGGERS (optional, comma separated, default: "push")
    /// - CONVEYOR_COMMIT_STATUS_URL / CONVEYOR_NOTIFICATION_URL (optional)
    /// - CONVEYOR_CONFIG (optional, path to a JSON file overriding the
    ///   stage plan, deployment targets and sink URLs)
    pub fn from_env() -> Result<Self> {
        let webhook_secret = std::env::var("CONVEYOR_WEBHOOK_SECRET")
            .map_err(|_| anyhow::anyhow!("CONVEYOR_WEBHOOK_SECRET environment variable not set"))?;

        let mut config = Self::new(webhook_secret);

        if let Ok(addr) = std::env::var("CONVEYOR_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(secs) = env_u64("CONVEYOR_DEBOUNCE_WINDOW_SECS") {
            config.debounce_window = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("CONVEYOR_AGENT_POOL_CAPACITY") {
            config.agent_pool_capacity = n as usize;
        }
        if let Some(n) = env_u64("CONVEYOR_READY_QUEUE_MAX_DEPTH") {
            config.ready_queue_max_depth = n as usize;
        }
        if let Some(n) = env_u64("CONVEYOR_RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = n as u32;
        }
        if let Some(n) = env_u64("CONVEYOR_HEALTH_CHECK_ATTEMPTS") {
            config.health_check_attempts = n as u32;
        }
        if let Some(secs) = env_u64("CONVEYOR_HEALTH_CHECK_INTERVAL_SECS") {
            config.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("CONVEYOR_REPORT_MAX_ATTEMPTS") {
            config.report_max_attempts = n as u32;
        }
        if let Ok(path) = std::env::var("CONVEYOR_WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CONVEYOR_ARTIFACT_DIR") {
            config.artifact_dir = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("CONVEYOR_COMMIT_STATUS_URL") {
            config.commit_status_url = Some(url);
        }
        if let Ok(url) = std::env::var("CONVEYOR_NOTIFICATION_URL") {
            config.notification_url = Some(url);
        }
        if let Ok(triggers) = std::env::var("CONVEYOR_TRIGGERS") {
            config.triggers = parse_triggers(&triggers)?;
        }

        if let Ok(path) = std::env::var("CONVEYOR_CONFIG") {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path, e))?;
            let file: ConfigFile = serde_json::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path, e))?;
            config.apply_file(file);
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(stages) = file.stages {
            self.stages = stages;
        }
        if let Some(targets) = file.targets {
            self.targets = targets;
        }
        if let Some(triggers) = file.triggers {
            self.triggers = triggers;
        }
        if let Some(url) = file.commit_status_url {
            self.commit_status_url = Some(url);
        }
        if let Some(url) = file.notification_url {
            self.notification_url = Some(url);
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.webhook_secret.is_empty() {
            anyhow::bail!("webhook_secret cannot be empty");
        }

        if self.agent_pool_capacity == 0 {
            anyhow::bail!("agent_pool_capacity must be greater than 0");
        }

        if self.ready_queue_max_depth == 0 {
            anyhow::bail!("ready_queue_max_depth must be greater than 0");
        }

        if self.debounce_window.is_zero() {
            anyhow::bail!("debounce_window must be greater than 0");
        }

        if self.health_check_attempts == 0 {
            anyhow::bail!("health_check_attempts must be greater than 0");
        }

        if self.report_max_attempts == 0 {
            anyhow::bail!("report_max_attempts must be greater than 0");
        }

        if self.triggers.is_empty() {
            anyhow::bail!("at least one trigger event must be configured");
        }

        if self.stages.is_empty() {
            anyhow::bail!("stage plan cannot be empty");
        }

        let mut previous: Option<Stage> = None;
        for def in &self.stages {
            if def.stage == Stage::Notify {
                anyhow::bail!("notify is driven by the reporter and cannot appear in the stage plan");
            }
            if let Some(prev) = previous {
                if def.stage.ordinal() <= prev.ordinal() {
                    anyhow::bail!(
                        "stage plan must be in execution order: {} cannot follow {}",
                        def.stage,
                        prev
                    );
                }
            }
            previous = Some(def.stage);
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.environment.as_str()) {
                anyhow::bail!("duplicate deployment environment: {}", target.environment);
            }
        }

        Ok(())
    }
}

/// JSON file shape accepted via CONVEYOR_CONFIG
#[derive(Debug, Deserialize)]
struct ConfigFile {
    stages: Option<Vec<StageDefinition>>,
    targets: Option<Vec<DeploymentTarget>>,
    triggers: Option<Vec<TriggerEvent>>,
    commit_status_url: Option<String>,
    notification_url: Option<String>,
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

fn parse_triggers(raw: &str) -> Result<Vec<TriggerEvent>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s {
            "push" => Ok(TriggerEvent::Push),
            "pull_request" => Ok(TriggerEvent::PullRequest),
            other => Err(anyhow::anyhow!("unknown trigger event: {}", other)),
        })
        .collect()
}

/// The default stage plan
///
/// Checkout clones the repository at the requested commit; build, test,
/// quality and package delegate to the repository's make targets. The
/// deploy stage has no command: it dispatches to the strategy selector.
pub fn default_stage_plan() -> Vec<StageDefinition> {
    vec![
        StageDefinition {
            stage: Stage::Checkout,
            command: Some(CommandSpec::shell(
                "git clone \"$CONVEYOR_REPO_URL\" . && git checkout \"$CONVEYOR_COMMIT_SHA\"",
            )),
            retryable: true,
            timeout_secs: 120,
            failure_policy: FailurePolicy::AbortPipeline,
        },
        StageDefinition {
            stage: Stage::Build,
            command: Some(CommandSpec::shell("make build")),
            retryable: false,
            timeout_secs: 600,
            failure_policy: FailurePolicy::AbortPipeline,
        },
        StageDefinition {
            stage: Stage::Test,
            command: Some(CommandSpec::shell("make test")),
            retryable: false,
            timeout_secs: 600,
            failure_policy: FailurePolicy::AbortPipeline,
        },
        StageDefinition {
            stage: Stage::Quality,
            command: Some(CommandSpec::shell("make lint")),
            retryable: false,
            timeout_secs: 300,
            failure_policy: FailurePolicy::ContinueWithWarning,
        },
        StageDefinition {
            stage: Stage::Package,
            command: Some(CommandSpec::shell("make package")),
            retryable: false,
            timeout_secs: 300,
            failure_policy: FailurePolicy::AbortPipeline,
        },
        StageDefinition {
            stage: Stage::Deploy,
            command: None,
            retryable: false,
            timeout_secs: 600,
            failure_policy: FailurePolicy::AbortPipeline,
        },
    ]
}
