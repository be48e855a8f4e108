use std::time::SystemTime;

use crate::types::TxId;

/// Why a garbage collection pass ran.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GcTrigger {
    /// Requested through [`super::Graph::collect_garbage`].
    Manual,
    /// Scheduled by a [`super::GcWorker`].
    Timer,
}

/// Statistics for one garbage collection pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcStats {
    /// Timestamp when the pass started.
    pub started_at: SystemTime,
    /// Trigger for the pass.
    pub trigger: GcTrigger,
    /// Largest id of the reclaim boundary.
    pub boundary_oldest: TxId,
    /// Duration of the pass in milliseconds.
    pub run_millis: u64,
    /// Vertex chains examined.
    pub vertex_chains_scanned: u64,
    /// Edge chains examined.
    pub edge_chains_scanned: u64,
    /// Versions unlinked and scheduled for destruction.
    pub versions_reclaimed: u64,
    /// Chains removed from their collection because nothing in them can be
    /// seen any more.
    pub chains_dropped: u64,
}

impl GcStats {
    /// Returns `true` when the pass unlinked anything.
    pub fn made_progress(&self) -> bool {
        self.versions_reclaimed > 0 || self.chains_dropped > 0
    }
}
