//! Durability hook: the ordered stream of state deltas emitted by
//! transactions and record writes, plus an in-memory sink and replay.
//!
//! The engine emits `TxBegin`/`TxCommit`/`TxAbort` while holding its own
//! lock, so the order in which a sink observes commit markers is the commit
//! order. Record deltas are emitted by the writing transaction in program
//! order. Encoding the stream on disk is left to the sink implementation.

use std::fmt;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::storage::PropValue;
use crate::types::{Gid, LabelId, MvccError, PropId, Result, TxId, TypeId};

mod replay;

pub use replay::{replay, ReplayStats};

/// One logical change recorded for durability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateDelta {
    /// A transaction started.
    TxBegin {
        /// Transaction id.
        tx: TxId,
    },
    /// A transaction committed.
    TxCommit {
        /// Transaction id.
        tx: TxId,
    },
    /// A transaction aborted.
    TxAbort {
        /// Transaction id.
        tx: TxId,
    },
    /// A vertex was inserted.
    CreateVertex {
        /// Writing transaction.
        tx: TxId,
        /// New vertex.
        gid: Gid,
    },
    /// An edge was inserted.
    CreateEdge {
        /// Writing transaction.
        tx: TxId,
        /// New edge.
        gid: Gid,
        /// Source vertex.
        from: Gid,
        /// Destination vertex.
        to: Gid,
        /// Edge type.
        edge_type: TypeId,
    },
    /// A label was added to a vertex.
    AddLabel {
        /// Writing transaction.
        tx: TxId,
        /// Target vertex.
        gid: Gid,
        /// Added label.
        label: LabelId,
    },
    /// A label was removed from a vertex.
    RemoveLabel {
        /// Writing transaction.
        tx: TxId,
        /// Target vertex.
        gid: Gid,
        /// Removed label.
        label: LabelId,
    },
    /// A vertex property was set; [`PropValue::Null`] records a removal.
    SetVertexProperty {
        /// Writing transaction.
        tx: TxId,
        /// Target vertex.
        gid: Gid,
        /// Property key.
        prop: PropId,
        /// New value.
        value: PropValue,
    },
    /// An edge property was set; [`PropValue::Null`] records a removal.
    SetEdgeProperty {
        /// Writing transaction.
        tx: TxId,
        /// Target edge.
        gid: Gid,
        /// Property key.
        prop: PropId,
        /// New value.
        value: PropValue,
    },
    /// A vertex was removed.
    RemoveVertex {
        /// Writing transaction.
        tx: TxId,
        /// Removed vertex.
        gid: Gid,
    },
    /// An edge was removed.
    RemoveEdge {
        /// Writing transaction.
        tx: TxId,
        /// Removed edge.
        gid: Gid,
    },
    /// A label/property index finished building.
    BuildIndex {
        /// Transaction that performed the build scan.
        tx: TxId,
        /// Indexed label.
        label: LabelId,
        /// Indexed property.
        prop: PropId,
    },
}

impl StateDelta {
    /// Transaction the delta belongs to.
    pub fn tx(&self) -> TxId {
        match self {
            StateDelta::TxBegin { tx }
            | StateDelta::TxCommit { tx }
            | StateDelta::TxAbort { tx }
            | StateDelta::CreateVertex { tx, .. }
            | StateDelta::CreateEdge { tx, .. }
            | StateDelta::AddLabel { tx, .. }
            | StateDelta::RemoveLabel { tx, .. }
            | StateDelta::SetVertexProperty { tx, .. }
            | StateDelta::SetEdgeProperty { tx, .. }
            | StateDelta::RemoveVertex { tx, .. }
            | StateDelta::RemoveEdge { tx, .. }
            | StateDelta::BuildIndex { tx, .. } => *tx,
        }
    }

    /// Returns `true` for the begin/commit/abort markers.
    pub fn is_tx_marker(&self) -> bool {
        matches!(
            self,
            StateDelta::TxBegin { .. } | StateDelta::TxCommit { .. } | StateDelta::TxAbort { .. }
        )
    }
}

/// Receiver of the delta stream.
///
/// `emplace` may be called while the engine holds its internal lock, so
/// implementations must not call back into the engine and must not block on
/// I/O for long.
pub trait DurabilitySink: Send + Sync {
    /// Appends one delta.
    fn emplace(&self, delta: StateDelta);
}

/// Sink that discards everything.
#[derive(Default, Debug, Clone, Copy)]
pub struct NullSink;

impl DurabilitySink for NullSink {
    fn emplace(&self, _delta: StateDelta) {}
}

/// Sink keeping the full ordered stream in memory.
#[derive(Default)]
pub struct MemorySink {
    deltas: Mutex<Vec<StateDelta>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the recorded stream.
    pub fn deltas(&self) -> Vec<StateDelta> {
        self.deltas.lock().clone()
    }

    /// Number of recorded deltas.
    pub fn len(&self) -> usize {
        self.deltas.lock().len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.deltas.lock().is_empty()
    }

    /// Drops every recorded delta.
    pub fn clear(&self) {
        self.deltas.lock().clear();
    }

    /// Groups the stream by transaction and returns the committed ones in
    /// commit order. Each group excludes the begin/commit markers.
    pub fn committed_in_order(&self) -> Vec<(TxId, Vec<StateDelta>)> {
        committed_groups(&self.deltas.lock())
    }

    /// Serializes the stream as newline-delimited JSON.
    pub fn to_json_lines(&self) -> Result<String> {
        let deltas = self.deltas.lock();
        let mut out = String::new();
        for delta in deltas.iter() {
            let line = serde_json::to_string(delta)
                .map_err(|err| MvccError::Replay(format!("encode delta: {err}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

impl DurabilitySink for MemorySink {
    fn emplace(&self, delta: StateDelta) {
        self.deltas.lock().push(delta);
    }
}

impl fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySink")
            .field("len", &self.len())
            .finish()
    }
}

/// Parses a newline-delimited JSON stream produced by
/// [`MemorySink::to_json_lines`]. Blank lines are ignored.
pub fn from_json_lines(text: &str) -> Result<Vec<StateDelta>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|err| MvccError::Replay(format!("line {}: {err}", idx + 1)))
        })
        .collect()
}

pub(crate) fn committed_groups(deltas: &[StateDelta]) -> Vec<(TxId, Vec<StateDelta>)> {
    let mut pending: FxHashMap<TxId, Vec<StateDelta>> = FxHashMap::default();
    let mut committed = Vec::new();
    for delta in deltas {
        match delta {
            StateDelta::TxBegin { tx } => {
                pending.entry(*tx).or_default();
            }
            StateDelta::TxCommit { tx } => {
                let body = pending.remove(tx).unwrap_or_default();
                committed.push((*tx, body));
            }
            StateDelta::TxAbort { tx } => {
                pending.remove(tx);
            }
            other => pending.entry(other.tx()).or_default().push(other.clone()),
        }
    }
    committed
}
