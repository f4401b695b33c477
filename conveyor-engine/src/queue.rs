//! Dedup/coalescing queue
//!
//! Prevents build storms from rapid pushes to the same (repository, ref).
//! Each key holds at most one pending entry; a newer request for the same
//! key supersedes the pending one and restarts the quiet-period timer, so a
//! burst of N pushes inside the window yields exactly one scheduled build,
//! against the newest commit. Timers are cancellable spawned tasks, scoped
//! per key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use conveyor_core::domain::request::{BuildRequest, RequestKey};

/// Coalescing queue in front of the scheduler
///
/// Internally synchronized; callers only see atomic submit/supersede
/// semantics. Entries that survive their quiet period are forwarded on the
/// scheduler channel in firing order.
pub struct DedupQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    window: Duration,
    slots: Mutex<HashMap<RequestKey, Slot>>,
    tx: mpsc::UnboundedSender<BuildRequest>,
    superseded_total: AtomicU64,
}

struct Slot {
    /// Bumped on every supersession; a timer only fires for its own generation
    generation: u64,
    timer: JoinHandle<()>,
}

impl DedupQueue {
    pub fn new(window: Duration, tx: mpsc::UnboundedSender<BuildRequest>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                window,
                slots: Mutex::new(HashMap::new()),
                tx,
                superseded_total: AtomicU64::new(0),
            }),
        }
    }

    /// Submits a build request, superseding any pending entry for its key
    pub fn submit(&self, request: BuildRequest) {
        let key = request.key();
        let mut slots = self.inner.slots.lock().unwrap();

        let generation = match slots.remove(&key) {
            Some(previous) => {
                previous.timer.abort();
                self.inner.superseded_total.fetch_add(1, Ordering::Relaxed);
                info!(
                    repository = %key.repository,
                    source_ref = %key.source_ref,
                    commit_sha = %request.commit_sha,
                    "Superseding pending entry with newer commit"
                );
                previous.generation + 1
            }
            None => {
                debug!(
                    repository = %key.repository,
                    source_ref = %key.source_ref,
                    "Starting debounce window for new key"
                );
                0
            }
        };

        let timer = tokio::spawn(debounce(
            Arc::clone(&self.inner),
            key.clone(),
            generation,
            request,
        ));

        slots.insert(key, Slot { generation, timer });
    }

    /// Number of keys currently inside their quiet period
    pub fn pending_len(&self) -> usize {
        self.inner.slots.lock().unwrap().len()
    }

    /// Total entries superseded since startup
    pub fn superseded_total(&self) -> u64 {
        self.inner.superseded_total.load(Ordering::Relaxed)
    }
}

/// Waits out the quiet period, then hands the entry to the scheduler unless
/// it was superseded in the meantime
async fn debounce(
    inner: Arc<QueueInner>,
    key: RequestKey,
    generation: u64,
    request: BuildRequest,
) {
    tokio::time::sleep(inner.window).await;

    let scheduled = {
        let mut slots = inner.slots.lock().unwrap();
        match slots.get(&key) {
            Some(slot) if slot.generation == generation => {
                slots.remove(&key);
                true
            }
            // Superseded while this timer was waiting on the lock
            _ => false,
        }
    };

    if scheduled {
        debug!(
            repository = %key.repository,
            source_ref = %key.source_ref,
            commit_sha = %request.commit_sha,
            "Quiet period elapsed, handing entry to scheduler"
        );
        if inner.tx.send(request).is_err() {
            warn!("Scheduler channel closed, dropping scheduled entry");
        }
    }
}
