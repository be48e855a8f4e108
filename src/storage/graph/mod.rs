use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::durability::{DurabilitySink, NullSink, StateDelta};
use crate::storage::index::{IndexBuilders, IndexKey, IndexRegistry};
use crate::storage::metrics::{default_metrics, MvccMetrics};
use crate::storage::options::{GcCfg, GraphOptions, IndexBuildCfg};
use crate::storage::record::{Edge, Vertex};
use crate::transaction::{Engine, Transaction};
use crate::types::{CommandId, Gid, MvccError, Result};

mod counters;
mod edge_ops;
mod graph_types;
mod index_ops;
mod store;
mod vacuum;
mod vertex_ops;

pub use counters::Counters;
pub use graph_types::GcStats;
pub use store::ChainStore;
pub use vacuum::GcWorker;

/// In-memory versioned graph.
///
/// Owns the transaction engine and the vertex and edge chain collections.
/// All reads and writes go through a [`GraphAccessor`], one per transaction.
pub struct Graph {
    engine: Arc<Engine>,
    vertices: ChainStore<Vertex>,
    edges: ChainStore<Edge>,
    sink: Arc<dyn DurabilitySink>,
    metrics: Arc<dyn MvccMetrics>,
    indexes: IndexRegistry,
    index_builders: IndexBuilders,
    counters: Counters,
    gc_cfg: GcCfg,
    index_build_cfg: IndexBuildCfg,
}

impl Graph {
    /// Opens an empty graph.
    pub fn open(opts: GraphOptions) -> Arc<Self> {
        let sink = opts.sink.unwrap_or_else(|| Arc::new(NullSink));
        let metrics = opts.metrics.unwrap_or_else(default_metrics);
        let engine = Arc::new(Engine::new(Arc::clone(&sink)));
        debug!(gc_enabled = opts.gc.enabled, "graph.open");
        Arc::new(Self {
            engine,
            vertices: ChainStore::new(),
            edges: ChainStore::new(),
            sink,
            metrics,
            indexes: IndexRegistry::default(),
            index_builders: IndexBuilders::default(),
            counters: Counters::default(),
            gc_cfg: opts.gc,
            index_build_cfg: opts.index_build,
        })
    }

    /// Starts a transaction.
    pub fn access(self: &Arc<Self>) -> GraphAccessor {
        let tx = self.engine.begin();
        self.metrics.tx_begun();
        GraphAccessor {
            graph: Arc::clone(self),
            tx,
            finished: Cell::new(false),
            doomed: Cell::new(None),
        }
    }

    /// Transaction engine shared by every accessor of this graph.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Vertex chains, including ones no transaction can see any more.
    pub fn vertex_store(&self) -> &ChainStore<Vertex> {
        &self.vertices
    }

    /// Edge chains, including ones no transaction can see any more.
    pub fn edge_store(&self) -> &ChainStore<Edge> {
        &self.edges
    }

    /// Keys of registered indexes, including ones still being built.
    pub fn index_keys(&self) -> Vec<IndexKey> {
        self.indexes.keys()
    }

    /// Background collection settings this graph was opened with.
    pub fn gc_cfg(&self) -> &GcCfg {
        &self.gc_cfg
    }

    pub(crate) fn emit(&self, delta: StateDelta) {
        self.sink.emplace(delta);
    }

    pub(crate) fn metrics(&self) -> &dyn MvccMetrics {
        self.metrics.as_ref()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn indexes(&self) -> &IndexRegistry {
        &self.indexes
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("engine", &self.engine)
            .field("vertices", &self.vertices.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

/// One transaction against a [`Graph`].
///
/// Dropping an accessor that was neither committed nor aborted aborts it.
/// Every operation after [`GraphAccessor::commit`] or
/// [`GraphAccessor::abort`] fails with [`MvccError::InvalidTransactionState`].
///
/// A serialization conflict on any write dooms the transaction: a later
/// [`GraphAccessor::commit`] aborts it and reports the conflict again.
pub struct GraphAccessor {
    graph: Arc<Graph>,
    tx: Arc<Transaction>,
    finished: Cell<bool>,
    doomed: Cell<Option<Gid>>,
}

impl GraphAccessor {
    /// Underlying transaction.
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// Graph this accessor reads and writes.
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Returns `true` once a write of this transaction hit a serialization
    /// conflict. Such a transaction can only abort.
    pub fn is_doomed(&self) -> bool {
        self.doomed.get().is_some()
    }

    /// Returns `true` until the transaction commits or aborts.
    pub fn is_active(&self) -> bool {
        !self.finished.get()
    }

    /// Makes this command's writes visible to the transaction's next reads.
    pub fn advance_command(&self) -> Result<CommandId> {
        self.check_active()?;
        self.graph.engine.advance(self.tx.id())
    }

    /// Commits the transaction.
    ///
    /// Fails with [`MvccError::Serialization`], after aborting, if one of the
    /// transaction's writes hit a conflict.
    pub fn commit(&self) -> Result<()> {
        self.check_active()?;
        if let Some(gid) = self.doomed.get() {
            self.abort()?;
            debug!(tx = self.tx.id().0, gid = gid.0, "graph.accessor.commit_refused");
            return Err(MvccError::Serialization { gid });
        }
        self.graph.engine.commit(&self.tx)?;
        self.finished.set(true);
        self.graph.metrics.tx_committed();
        trace!(tx = self.tx.id().0, "graph.accessor.commit");
        Ok(())
    }

    /// Aborts the transaction; none of its writes ever become visible.
    pub fn abort(&self) -> Result<()> {
        self.check_active()?;
        self.graph.engine.abort(&self.tx)?;
        self.finished.set(true);
        self.graph.metrics.tx_aborted();
        trace!(tx = self.tx.id().0, "graph.accessor.abort");
        Ok(())
    }

    pub(crate) fn check_active(&self) -> Result<()> {
        if self.finished.get() {
            return Err(MvccError::InvalidTransactionState { tx: self.tx.id() });
        }
        Ok(())
    }

    /// Counts conflicts on their way out of a write path and dooms the
    /// transaction on the first one.
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(MvccError::Serialization { gid }) = &result {
            if self.doomed.get().is_none() {
                self.doomed.set(Some(*gid));
            }
            debug!(tx = self.tx.id().0, gid = gid.0, "graph.accessor.serialization_conflict");
            self.graph.metrics.serialization_conflict();
        }
        result
    }
}

impl Drop for GraphAccessor {
    fn drop(&mut self) {
        if self.finished.get() {
            return;
        }
        if let Err(err) = self.abort() {
            debug!(tx = self.tx.id().0, error = %err, "graph.accessor.drop_abort_failed");
        }
    }
}

impl fmt::Debug for GraphAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphAccessor")
            .field("tx", &self.tx)
            .field("finished", &self.finished.get())
            .field("doomed", &self.doomed.get())
            .finish()
    }
}
