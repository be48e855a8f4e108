use rustc_hash::FxHashSet;
use tracing::trace;

use crate::durability::StateDelta;
use crate::storage::accessor::VertexAccessor;
use crate::storage::mvcc::ReadMode;
use crate::storage::record::Vertex;
use crate::storage::types::DeleteMode;
use crate::types::{Gid, MvccError, Result};

use super::GraphAccessor;

pub(super) fn read_mode(current_state: bool) -> ReadMode {
    if current_state {
        ReadMode::CurrentState
    } else {
        ReadMode::Snapshot
    }
}

impl GraphAccessor {
    /// Inserts an empty vertex, with `gid` or the next free id.
    pub fn insert_vertex(&self, gid: Option<Gid>) -> Result<VertexAccessor<'_>> {
        self.check_active()?;
        let chain = self
            .graph
            .vertices
            .insert(gid, &self.tx, Vertex::default())?;
        self.graph.emit(StateDelta::CreateVertex {
            tx: self.tx.id(),
            gid: chain.gid(),
        });
        self.graph.metrics.version_created();
        trace!(tx = self.tx.id().0, gid = chain.gid().0, "graph.vertex.insert");
        Ok(VertexAccessor::new(self, chain, ReadMode::CurrentState))
    }

    /// Vertex `gid` if visible to this transaction in the requested view.
    pub fn find_vertex(&self, gid: Gid, current_state: bool) -> Result<Option<VertexAccessor<'_>>> {
        self.check_active()?;
        let mode = read_mode(current_state);
        let clog = self.graph.engine.commit_log();
        Ok(self
            .graph
            .vertices
            .get(gid)
            .filter(|chain| chain.is_visible(&self.tx, clog, mode))
            .map(|chain| VertexAccessor::new(self, chain, mode)))
    }

    /// Every vertex visible in the requested view, ordered by id.
    pub fn vertices(&self, current_state: bool) -> Result<Vec<VertexAccessor<'_>>> {
        self.check_active()?;
        let mode = read_mode(current_state);
        let clog = self.graph.engine.commit_log();
        Ok(self
            .graph
            .vertices
            .chains()
            .into_iter()
            .filter(|chain| chain.is_visible(&self.tx, clog, mode))
            .map(|chain| VertexAccessor::new(self, chain, mode))
            .collect())
    }

    /// Number of vertices visible with this transaction's own writes applied.
    pub fn vertices_count(&self) -> Result<usize> {
        Ok(self.vertices(true)?.len())
    }

    /// Removes vertex `gid` when no edge is attached to it.
    ///
    /// Returns `Ok(false)` and leaves the vertex in place if it still has
    /// edges, or if this transaction removed it already.
    pub fn remove_vertex(&self, gid: Gid) -> Result<bool> {
        self.remove_vertex_with(gid, DeleteMode::Restrict)
    }

    /// Removes vertex `gid` together with every attached edge.
    pub fn detach_remove_vertex(&self, gid: Gid) -> Result<()> {
        self.remove_vertex_with(gid, DeleteMode::Detach)?;
        Ok(())
    }

    fn remove_vertex_with(&self, gid: Gid, mode: DeleteMode) -> Result<bool> {
        self.check_active()?;
        let chain = self
            .graph
            .vertices
            .get(gid)
            .ok_or(MvccError::EntityNotFound { gid })?;
        let clog = self.graph.engine.commit_log();
        let Some(vertex) = chain.find(&self.tx, clog, ReadMode::CurrentState) else {
            if chain.history().iter().any(|info| info.expired_by == Some(self.tx.id())) {
                return Ok(false);
            }
            return Err(MvccError::EntityNotFound { gid });
        };
        if !vertex.is_isolated() {
            match mode {
                DeleteMode::Restrict => return Ok(false),
                DeleteMode::Detach => {
                    let mut seen = FxHashSet::default();
                    for edge in vertex.out_edges.iter().chain(vertex.in_edges.iter()) {
                        if seen.insert(edge.edge) {
                            self.remove_edge(edge.edge)?;
                        }
                    }
                }
            }
        }
        let removed = self.track(chain.remove(&self.tx, clog))?;
        if removed {
            self.graph.emit(StateDelta::RemoveVertex {
                tx: self.tx.id(),
                gid,
            });
            trace!(tx = self.tx.id().0, gid = gid.0, "graph.vertex.remove");
        }
        Ok(removed)
    }
}
