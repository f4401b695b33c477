//! Run registry
//!
//! Tracks active pipeline runs (with their abort signals) and a bounded
//! archive of finished ones. The executor pushes snapshots here at every
//! state transition so the HTTP API can serve run state without touching
//! the executing task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

use conveyor_core::domain::run::{PipelineRun, RunId};

/// Finished runs kept in memory for the API
const MAX_ARCHIVED: usize = 512;

/// Result of signalling an abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The run was active and has been signalled
    Signalled,
    /// The run already reached a terminal state
    AlreadyFinished,
    NotFound,
}

pub struct RunRegistry {
    active: Mutex<HashMap<RunId, ActiveRun>>,
    archived: Mutex<Vec<PipelineRun>>,
    archived_total: AtomicU64,
}

struct ActiveRun {
    snapshot: PipelineRun,
    abort_tx: watch::Sender<bool>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            archived: Mutex::new(Vec::new()),
            archived_total: AtomicU64::new(0),
        }
    }

    /// Registers a newly created run and returns its abort receiver
    pub fn register(&self, run: PipelineRun) -> watch::Receiver<bool> {
        let (abort_tx, abort_rx) = watch::channel(false);
        self.active.lock().unwrap().insert(
            run.run_id,
            ActiveRun {
                snapshot: run,
                abort_tx,
            },
        );
        abort_rx
    }

    /// Replaces the stored snapshot for an active run
    pub fn update(&self, run: &PipelineRun) {
        if let Some(active) = self.active.lock().unwrap().get_mut(&run.run_id) {
            active.snapshot = run.clone();
        }
    }

    /// Moves a finished run from the active set to the archive
    pub fn archive(&self, run: PipelineRun) {
        let run_id = run.run_id;
        self.active.lock().unwrap().remove(&run_id);

        let mut archived = self.archived.lock().unwrap();
        archived.push(run);
        if archived.len() > MAX_ARCHIVED {
            let excess = archived.len() - MAX_ARCHIVED;
            archived.drain(..excess);
        }
        self.archived_total.fetch_add(1, Ordering::Relaxed);
        debug!(run_id = %run_id, "Run archived");
    }

    /// Signals an external abort for the given run
    pub fn abort(&self, run_id: RunId) -> AbortOutcome {
        if let Some(active) = self.active.lock().unwrap().get(&run_id) {
            // Receiver is alive as long as the run task is
            let _ = active.abort_tx.send(true);
            return AbortOutcome::Signalled;
        }

        let archived = self.archived.lock().unwrap();
        if archived.iter().any(|run| run.run_id == run_id) {
            AbortOutcome::AlreadyFinished
        } else {
            AbortOutcome::NotFound
        }
    }

    pub fn get(&self, run_id: RunId) -> Option<PipelineRun> {
        if let Some(active) = self.active.lock().unwrap().get(&run_id) {
            return Some(active.snapshot.clone());
        }
        self.archived
            .lock()
            .unwrap()
            .iter()
            .find(|run| run.run_id == run_id)
            .cloned()
    }

    /// All known runs, oldest first
    pub fn list(&self) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self
            .active
            .lock()
            .unwrap()
            .values()
            .map(|a| a.snapshot.clone())
            .collect();
        runs.extend(self.archived.lock().unwrap().iter().cloned());
        runs.sort_by_key(|run| run.run_id);
        runs
    }

    pub fn archived_total(&self) -> u64 {
        self.archived_total.load(Ordering::Relaxed)
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}
