use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durability::DurabilitySink;
use crate::types::{MvccError, Result};

use super::metrics::MvccMetrics;

/// Configuration options supplied when opening a [`super::Graph`].
#[derive(Clone, Default)]
pub struct GraphOptions {
    /// Receiver of the delta stream; deltas are dropped when unset.
    pub sink: Option<Arc<dyn DurabilitySink>>,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn MvccMetrics>>,
    /// Background garbage collection configuration.
    pub gc: GcCfg,
    /// Index build polling configuration.
    pub index_build: IndexBuildCfg,
}

impl GraphOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durability sink.
    pub fn sink(mut self, sink: Arc<dyn DurabilitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn MvccMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the garbage collection configuration.
    pub fn gc(mut self, cfg: GcCfg) -> Self {
        self.gc = cfg;
        self
    }

    /// Sets the index build polling configuration.
    pub fn index_build(mut self, cfg: IndexBuildCfg) -> Self {
        self.index_build = cfg;
        self
    }

    /// Applies the plain-data sections of a parsed options file.
    pub fn apply_file(mut self, file: &OptionsFile) -> Self {
        self.gc = file.gc.clone();
        self.index_build = file.index_build.clone();
        self
    }
}

impl fmt::Debug for GraphOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphOptions")
            .field("sink", &self.sink.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("gc", &self.gc)
            .field("index_build", &self.index_build)
            .finish()
    }
}

/// Configuration for background garbage collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcCfg {
    /// Whether [`super::Graph::spawn_gc_worker`] starts a background worker.
    pub enabled: bool,
    /// Interval between passes, in milliseconds.
    pub interval_ms: u64,
}

impl GcCfg {
    /// Interval between passes.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for GcCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_000,
        }
    }
}

/// Backoff used while an index build waits for older transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexBuildCfg {
    /// First sleep between polls, in microseconds.
    pub initial_backoff_us: u64,
    /// Upper bound for the sleep between polls, in microseconds.
    pub max_backoff_us: u64,
}

impl IndexBuildCfg {
    /// Sleep before the `attempt`-th re-poll (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.initial_backoff_us.max(1);
        let max = self.max_backoff_us.max(initial);
        let scaled = initial.saturating_mul(1u64 << attempt.min(20));
        Duration::from_micros(scaled.min(max))
    }
}

impl Default for IndexBuildCfg {
    fn default() -> Self {
        Self {
            initial_backoff_us: 50,
            max_backoff_us: 10_000,
        }
    }
}

/// TOML representation of the plain-data options.
///
/// ```toml
/// [gc]
/// enabled = true
/// interval_ms = 250
///
/// [index_build]
/// max_backoff_us = 5000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsFile {
    /// `[gc]` table.
    pub gc: GcCfg,
    /// `[index_build]` table.
    pub index_build: IndexBuildCfg,
}

impl OptionsFile {
    /// Parses an options file.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|_| MvccError::Invalid("malformed options file"))
    }
}
