//! Versioned record store.
//!
//! Vertices and edges live in per-record version chains. A [`Graph`] owns the
//! chain collections and hands out one [`GraphAccessor`] per transaction;
//! record-level reads and writes go through [`RecordAccessor`]s.

/// Index hooks and build coordination.
pub mod index;

mod accessor;
mod chain;
mod graph;
mod metrics;
mod mvcc;
mod options;
mod record;
mod types;

/// Record accessors.
pub use accessor::{EdgeAccessor, RecordAccessor, VertexAccessor};

/// Version chains.
pub use chain::{ChainGcOutcome, VersionChain};

/// Graph store, transaction accessor and garbage collection.
pub use graph::{ChainStore, Counters, GcStats, GcWorker, Graph, GraphAccessor};

/// Metrics collection.
pub use metrics::{default_metrics, CounterMetrics, MvccMetrics, NoopMetrics};

/// Versions and visibility.
pub use mvcc::{ReadMode, Version, VersionInfo};

/// Configuration.
pub use options::{GcCfg, GraphOptions, IndexBuildCfg, OptionsFile};

/// Record payloads.
pub use record::{Edge, EdgeRef, Props, Record, RecordKind, Vertex};

/// Property values.
pub use types::{DeleteMode, PropValue};
