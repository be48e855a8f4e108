use std::sync::Arc;

use tracing::{debug, info};

use super::{committed_groups, StateDelta};
use crate::storage::index::IndexKey;
use crate::storage::{Graph, GraphAccessor};
use crate::types::{Gid, MvccError, Result, TxId};

/// Summary of a replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Committed transactions re-applied.
    pub transactions: usize,
    /// Record deltas re-applied.
    pub deltas: usize,
    /// Index builds found in the stream, in order. Hooks are not part of the
    /// stream, so callers rebuild these themselves.
    pub index_builds: Vec<IndexKey>,
}

/// Re-applies every committed transaction of `deltas` onto `graph`, one
/// transaction at a time in commit order.
///
/// Aborted transactions and transactions without a commit marker are
/// skipped. Record ids are preserved, so `graph` should be empty.
pub fn replay(graph: &Arc<Graph>, deltas: &[StateDelta]) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for (tx, body) in committed_groups(deltas) {
        let dba = graph.access();
        for delta in &body {
            apply(&dba, delta, &mut stats).map_err(|err| match err {
                MvccError::Replay(_) => err,
                other => MvccError::Replay(format!("tx {tx}: {other}")),
            })?;
        }
        dba.commit()?;
        stats.transactions += 1;
        debug!(source_tx = tx.0, deltas = body.len(), "durability.replay.tx_applied");
    }
    info!(
        transactions = stats.transactions,
        deltas = stats.deltas,
        index_builds = stats.index_builds.len(),
        "durability.replay.complete"
    );
    Ok(stats)
}

fn apply(dba: &GraphAccessor, delta: &StateDelta, stats: &mut ReplayStats) -> Result<()> {
    match delta {
        StateDelta::CreateVertex { gid, .. } => {
            dba.insert_vertex(Some(*gid))?;
        }
        StateDelta::CreateEdge {
            gid,
            from,
            to,
            edge_type,
            ..
        } => {
            dba.insert_edge(*from, *to, *edge_type, Some(*gid))?;
        }
        StateDelta::AddLabel { tx, gid, label } => {
            vertex(dba, *tx, *gid)?.add_label(*label)?;
        }
        StateDelta::RemoveLabel { tx, gid, label } => {
            vertex(dba, *tx, *gid)?.remove_label(*label)?;
        }
        StateDelta::SetVertexProperty {
            tx,
            gid,
            prop,
            value,
        } => {
            vertex(dba, *tx, *gid)?.set_property(*prop, value.clone())?;
        }
        StateDelta::SetEdgeProperty {
            tx,
            gid,
            prop,
            value,
        } => {
            let edge = dba
                .find_edge(*gid, true)?
                .ok_or_else(|| missing(*tx, "edge", *gid))?;
            edge.set_property(*prop, value.clone())?;
        }
        StateDelta::RemoveVertex { tx, gid } => {
            if !dba.remove_vertex(*gid)? {
                return Err(MvccError::Replay(format!(
                    "tx {tx}: vertex {gid} still has edges at removal"
                )));
            }
        }
        StateDelta::RemoveEdge { gid, .. } => {
            dba.remove_edge(*gid)?;
        }
        StateDelta::BuildIndex { label, prop, .. } => {
            stats.index_builds.push(IndexKey {
                label: *label,
                prop: *prop,
            });
            return Ok(());
        }
        StateDelta::TxBegin { .. } | StateDelta::TxCommit { .. } | StateDelta::TxAbort { .. } => {
            return Ok(());
        }
    }
    stats.deltas += 1;
    Ok(())
}

fn vertex(dba: &GraphAccessor, tx: TxId, gid: Gid) -> Result<crate::storage::VertexAccessor<'_>> {
    dba.find_vertex(gid, true)?
        .ok_or_else(|| missing(tx, "vertex", gid))
}

fn missing(tx: TxId, kind: &str, gid: Gid) -> MvccError {
    MvccError::Replay(format!("tx {tx}: {kind} {gid} not found"))
}
