use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_epoch as epoch;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::store::ChainStore;
use crate::storage::record::Record;
use crate::transaction::{CommitLog, Snapshot};
use crate::types::TxId;

use super::graph_types::{GcStats, GcTrigger};
use super::Graph;

#[derive(Default)]
struct StoreSweep {
    scanned: u64,
    reclaimed: u64,
    dropped: u64,
}

fn sweep<T: Record>(store: &ChainStore<T>, boundary: &Snapshot, clog: &CommitLog) -> StoreSweep {
    let mut out = StoreSweep::default();
    for chain in store.chains() {
        out.scanned += 1;
        let outcome = chain.gc_deleted(boundary, clog);
        out.reclaimed += outcome.reclaimed as u64;
        if outcome.dead && store.unlink(&chain) {
            out.dropped += 1;
        }
    }
    out
}

impl Graph {
    /// Runs one garbage collection pass over every chain.
    pub fn collect_garbage(&self) -> GcStats {
        self.gc_pass(GcTrigger::Manual)
    }

    fn gc_pass(&self, trigger: GcTrigger) -> GcStats {
        let started_at = SystemTime::now();
        let boundary = self.engine.global_gc_snapshot();
        let clog = self.engine.commit_log();
        let vertices = sweep(&self.vertices, &boundary, clog);
        let edges = sweep(&self.edges, &boundary, clog);
        epoch::pin().flush();

        let run_millis = SystemTime::now()
            .duration_since(started_at)
            .map(|dur| dur.as_millis() as u64)
            .unwrap_or(0);
        let stats = GcStats {
            started_at,
            trigger,
            boundary_oldest: boundary.back().unwrap_or(TxId::NONE),
            run_millis,
            vertex_chains_scanned: vertices.scanned,
            edge_chains_scanned: edges.scanned,
            versions_reclaimed: vertices.reclaimed + edges.reclaimed,
            chains_dropped: vertices.dropped + edges.dropped,
        };
        self.metrics
            .gc_pass(stats.versions_reclaimed, stats.chains_dropped);
        if stats.made_progress() {
            info!(
                boundary = stats.boundary_oldest.0,
                trigger = ?stats.trigger,
                run_millis = stats.run_millis,
                versions = stats.versions_reclaimed,
                chains = stats.chains_dropped,
                "mvcc.gc.pass_complete"
            );
        } else {
            debug!(
                boundary = stats.boundary_oldest.0,
                trigger = ?stats.trigger,
                scanned = stats.vertex_chains_scanned + stats.edge_chains_scanned,
                "mvcc.gc.noop"
            );
        }
        stats
    }

    /// Starts a background collector if [`crate::storage::GcCfg::enabled`] is set.
    pub fn spawn_gc_worker(self: &Arc<Self>) -> Option<GcWorker> {
        if !self.gc_cfg.enabled {
            return None;
        }
        Some(GcWorker::spawn(self, self.gc_cfg.interval()))
    }
}

#[derive(Default)]
struct WorkerState {
    stop: bool,
    passes: u64,
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    wakeup: Condvar,
}

/// Background thread running a collection pass every interval.
///
/// Holds only a weak reference to the graph and exits once the graph is
/// gone or the worker is dropped.
pub struct GcWorker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl GcWorker {
    /// Spawns a worker for `graph`.
    pub fn spawn(graph: &Arc<Graph>, interval: Duration) -> Self {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState::default()),
            wakeup: Condvar::new(),
        });
        let weak = Arc::downgrade(graph);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("penumbra-gc".into())
            .spawn(move || Self::worker_loop(weak, worker_shared, interval))
            .map_err(|err| debug!(error = %err, "mvcc.gc.worker_spawn_failed"))
            .ok();
        Self { shared, handle }
    }

    /// Number of passes completed so far.
    pub fn passes(&self) -> u64 {
        self.shared.state.lock().passes
    }

    /// Returns `true` while the background thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn worker_loop(graph: Weak<Graph>, shared: Arc<WorkerShared>, interval: Duration) {
        debug!(interval_ms = interval.as_millis() as u64, "mvcc.gc.worker_start");
        loop {
            {
                let mut state = shared.state.lock();
                if !state.stop {
                    shared.wakeup.wait_for(&mut state, interval);
                }
                if state.stop {
                    break;
                }
            }
            let Some(graph) = graph.upgrade() else {
                break;
            };
            graph.gc_pass(GcTrigger::Timer);
            drop(graph);
            shared.state.lock().passes += 1;
        }
        debug!("mvcc.gc.worker_exit");
    }
}

impl Drop for GcWorker {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
