use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking transaction and record-store events.
///
/// Implementations receive one call per event from the graph layer. Calls
/// must be cheap: several are made while a record write is in progress.
pub trait MvccMetrics: Send + Sync {
    /// A transaction started.
    fn tx_begun(&self);

    /// A transaction committed.
    fn tx_committed(&self);

    /// A transaction aborted, explicitly or on drop.
    fn tx_aborted(&self);

    /// A write lost a conflict and returned a serialization error.
    fn serialization_conflict(&self);

    /// A new version was published on a chain.
    fn version_created(&self);

    /// A garbage collection pass finished.
    ///
    /// # Parameters
    /// * `reclaimed` - Versions unlinked by the pass.
    /// * `chains_dropped` - Chains removed from their collection.
    fn gc_pass(&self, reclaimed: u64, chains_dropped: u64);
}

/// A no-op implementation of [`MvccMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl MvccMetrics for NoopMetrics {
    fn tx_begun(&self) {}
    fn tx_committed(&self) {}
    fn tx_aborted(&self) {}
    fn serialization_conflict(&self) {}
    fn version_created(&self) {}
    fn gc_pass(&self, _reclaimed: u64, _chains_dropped: u64) {}
}

/// A thread-safe counter-based implementation of [`MvccMetrics`].
#[derive(Default, Debug)]
pub struct CounterMetrics {
    /// Transactions started.
    pub tx_begun: AtomicU64,
    /// Transactions committed.
    pub tx_committed: AtomicU64,
    /// Transactions aborted.
    pub tx_aborted: AtomicU64,
    /// Serialization conflicts reported to callers.
    pub serialization_conflicts: AtomicU64,
    /// Versions published.
    pub versions_created: AtomicU64,
    /// Garbage collection passes run.
    pub gc_passes: AtomicU64,
    /// Versions reclaimed by garbage collection.
    pub versions_reclaimed: AtomicU64,
    /// Chains dropped by garbage collection.
    pub chains_dropped: AtomicU64,
}

impl CounterMetrics {
    /// Reads one counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl MvccMetrics for CounterMetrics {
    fn tx_begun(&self) {
        self.tx_begun.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_committed(&self) {
        self.tx_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_aborted(&self) {
        self.tx_aborted.fetch_add(1, Ordering::Relaxed);
    }

    fn serialization_conflict(&self) {
        self.serialization_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    fn version_created(&self) {
        self.versions_created.fetch_add(1, Ordering::Relaxed);
    }

    fn gc_pass(&self, reclaimed: u64, chains_dropped: u64) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
        self.versions_reclaimed
            .fetch_add(reclaimed, Ordering::Relaxed);
        self.chains_dropped
            .fetch_add(chains_dropped, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn MvccMetrics> {
    Arc::new(NoopMetrics)
}
