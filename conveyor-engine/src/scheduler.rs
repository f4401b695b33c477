//! Build scheduler
//!
//! Dequeues scheduled entries in arrival order and binds each to a free
//! build agent. Capacity is a semaphore sized to the agent pool; waiting is
//! the only response to a full pool. The ready queue is bounded: when an
//! arrival would exceed the bound, the oldest waiting entry is dropped
//! (BACKPRESSURE_DROPPED) and must be resubmitted externally; it is never
//! retried automatically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use conveyor_core::domain::request::BuildRequest;
use conveyor_core::domain::run::{PipelineRun, RunId};

use crate::config::Config;
use crate::pipeline::PipelineExecutor;
use crate::registry::RunRegistry;

/// Handle over the dispatch loop, exposing scheduling gauges
pub struct Scheduler {
    state: Arc<SchedulerState>,
}

struct SchedulerState {
    capacity: usize,
    max_depth: usize,
    semaphore: Arc<Semaphore>,
    ready: Mutex<VecDeque<BuildRequest>>,
    /// Free agent names; popped on assignment, pushed back on completion
    agents: Mutex<Vec<String>>,
    next_run_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl SchedulerState {
    fn enqueue(&self, request: BuildRequest) {
        let mut ready = self.ready.lock().unwrap();
        ready.push_back(request);

        if ready.len() > self.max_depth {
            if let Some(dropped) = ready.pop_front() {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                warn!(
                    repository = %dropped.repository,
                    source_ref = %dropped.source_ref,
                    commit_sha = %dropped.commit_sha,
                    "BACKPRESSURE_DROPPED: ready queue full, dropping oldest entry (external resubmission required)"
                );
            }
        }
    }

    fn has_ready(&self) -> bool {
        !self.ready.lock().unwrap().is_empty()
    }

    fn pop_ready(&self) -> Option<BuildRequest> {
        self.ready.lock().unwrap().pop_front()
    }
}

impl Scheduler {
    /// Spawns the dispatch loop consuming entries from the dedup queue
    pub fn start(
        config: &Config,
        executor: Arc<PipelineExecutor>,
        registry: Arc<RunRegistry>,
        mut rx: mpsc::UnboundedReceiver<BuildRequest>,
    ) -> Self {
        let capacity = config.agent_pool_capacity;
        let state = Arc::new(SchedulerState {
            capacity,
            max_depth: config.ready_queue_max_depth,
            semaphore: Arc::new(Semaphore::new(capacity)),
            ready: Mutex::new(VecDeque::new()),
            // reversed so agent-0 is assigned first
            agents: Mutex::new((0..capacity).rev().map(|i| format!("agent-{}", i)).collect()),
            next_run_id: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        });

        let dispatch = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(request) => dispatch.enqueue(request),
                            None => break,
                        }
                    }
                    permit = dispatch.semaphore.clone().acquire_owned(), if dispatch.has_ready() => {
                        // acquire_owned only errs when the semaphore is closed
                        let Ok(permit) = permit else { break };
                        if let Some(request) = dispatch.pop_ready() {
                            launch(&dispatch, &executor, &registry, request, permit);
                        }
                    }
                }
            }
            info!("Scheduler dispatch loop stopped");
        });

        Self { state }
    }

    /// Entries waiting for a free agent
    pub fn queue_depth(&self) -> usize {
        self.state.ready.lock().unwrap().len()
    }

    /// Runs currently bound to an agent
    pub fn active_runs(&self) -> usize {
        self.state.capacity - self.state.semaphore.available_permits()
    }

    /// Entries dropped under backpressure since startup
    pub fn dropped_total(&self) -> u64 {
        self.state.dropped_total.load(Ordering::Relaxed)
    }
}

/// Creates the run for an entry and spawns its pipeline task
fn launch(
    state: &Arc<SchedulerState>,
    executor: &Arc<PipelineExecutor>,
    registry: &Arc<RunRegistry>,
    request: BuildRequest,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    let run_id = RunId(state.next_run_id.fetch_add(1, Ordering::Relaxed) + 1);
    let agent_id = state
        .agents
        .lock()
        .unwrap()
        .pop()
        .unwrap_or_else(|| format!("agent-{}", run_id));

    info!(
        run_id = %run_id,
        repository = %request.repository,
        source_ref = %request.source_ref,
        commit_sha = %request.commit_sha,
        agent_id = %agent_id,
        "Assigning entry to free agent"
    );

    let run = PipelineRun::new(run_id, request, agent_id.clone());
    let abort_rx = registry.register(run.clone());

    let state = Arc::clone(state);
    let executor = Arc::clone(executor);
    tokio::spawn(async move {
        executor.execute(run, abort_rx).await;
        state.agents.lock().unwrap().push(agent_id);
        // capacity frees when the permit drops
        drop(permit);
    });
}
