//! Status reporter
//!
//! Publishes run state transitions to the configured sinks: a commit-status
//! API and a notification channel. Delivery is at-least-once: duplicates
//! are acceptable, missed terminal notifications are not. Failed publishes
//! are retried with exponential backoff up to a bounded attempt count, then
//! logged as UNDELIVERED. A single worker drains the event channel, so
//! deliveries for one run always go out in the order they occurred.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use conveyor_core::domain::run::{PipelineRun, RunId, RunStatus};
use conveyor_core::domain::stage::Stage;
use conveyor_core::dto::status::{CommitState, CommitStatus, Notification};

const INITIAL_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Name under which commit statuses are published
const STATUS_CONTEXT: &str = "conveyor/pipeline";

/// One state transition to publish
#[derive(Debug, Clone)]
pub enum ReportEvent {
    CommitStatus {
        run_id: RunId,
        repository: String,
        commit_sha: String,
        status: CommitStatus,
    },
    Notification(Notification),
}

/// Destination for report events
///
/// Sinks that do not handle a given event kind return Ok without side
/// effects (the commit-status sink ignores notifications and vice versa).
#[async_trait]
pub trait StatusSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &ReportEvent) -> anyhow::Result<()>;
}

/// Handle used by the executor to enqueue report events
#[derive(Clone)]
pub struct ReporterHandle {
    tx: mpsc::UnboundedSender<ReportEvent>,
}

impl ReporterHandle {
    /// Publishes the initial pending status for a freshly assigned run
    pub fn run_started(&self, run: &PipelineRun) {
        self.commit_status(run, CommitState::Pending, "pipeline started".to_string());
    }

    /// Publishes an intermediate pending status naming the running stage
    pub fn stage_started(&self, run: &PipelineRun, stage: Stage) {
        self.commit_status(run, CommitState::Pending, format!("stage {} running", stage));
    }

    /// Publishes the terminal status and the notification for a finished run
    pub fn run_finished(&self, run: &PipelineRun) {
        let description = match run.status {
            RunStatus::Succeeded => "pipeline succeeded",
            RunStatus::Failed => "pipeline failed",
            RunStatus::Aborted => "pipeline aborted",
            RunStatus::Running => "pipeline running",
        };
        self.commit_status(run, CommitState::from(run.status), description.to_string());
        self.send(ReportEvent::Notification(Notification::from(run)));
    }

    fn commit_status(&self, run: &PipelineRun, state: CommitState, description: String) {
        self.send(ReportEvent::CommitStatus {
            run_id: run.run_id,
            repository: run.request.repository.clone(),
            commit_sha: run.request.commit_sha.clone(),
            status: CommitStatus {
                state,
                context: STATUS_CONTEXT.to_string(),
                description,
                target_url: None,
            },
        });
    }

    fn send(&self, event: ReportEvent) {
        if self.tx.send(event).is_err() {
            warn!("Reporter worker stopped, dropping report event");
        }
    }
}

/// The reporter worker
pub struct Reporter;

impl Reporter {
    /// Spawns the delivery worker and returns the handle used to feed it
    pub fn start(
        sinks: Vec<Arc<dyn StatusSink>>,
        max_attempts: u32,
    ) -> (ReporterHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReportEvent>();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    deliver(sink.as_ref(), &event, max_attempts).await;
                }
            }
        });

        (ReporterHandle { tx }, worker)
    }
}

/// Delivers one event to one sink, retrying with exponential backoff
async fn deliver(sink: &dyn StatusSink, event: &ReportEvent, max_attempts: u32) {
    let mut delay_ms = INITIAL_DELAY_MS;

    for attempt in 1..=max_attempts {
        match sink.publish(event).await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(sink = sink.name(), attempt, "Delivered after retry");
                }
                return;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    sink = sink.name(),
                    attempt, "Publish failed, retrying in {} ms: {:#}", delay_ms, e
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
            Err(e) => {
                error!(
                    sink = sink.name(),
                    attempts = max_attempts,
                    "UNDELIVERED: giving up on report event: {:#}",
                    e
                );
            }
        }
    }
}

/// Commit-status API sink
///
/// Posts the status against the commit sha, GitHub-style:
/// `POST {base}/{repository}/statuses/{sha}`.
pub struct HttpCommitStatusSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCommitStatusSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatusSink for HttpCommitStatusSink {
    fn name(&self) -> &str {
        "commit-status"
    }

    async fn publish(&self, event: &ReportEvent) -> anyhow::Result<()> {
        let ReportEvent::CommitStatus {
            repository,
            commit_sha,
            status,
            ..
        } = event
        else {
            return Ok(());
        };

        let url = format!("{}/{}/statuses/{}", self.base_url, repository, commit_sha);
        let response = self.client.post(&url).json(status).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("commit status API returned {}", response.status());
        }
        Ok(())
    }
}

/// Notification channel sink
pub struct HttpNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl StatusSink for HttpNotificationSink {
    fn name(&self) -> &str {
        "notification"
    }

    async fn publish(&self, event: &ReportEvent) -> anyhow::Result<()> {
        let ReportEvent::Notification(notification) = event else {
            return Ok(());
        };

        let response = self.client.post(&self.url).json(notification).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("notification channel returned {}", response.status());
        }
        Ok(())
    }
}
