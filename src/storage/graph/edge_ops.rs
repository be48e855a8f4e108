use tracing::trace;

use crate::durability::StateDelta;
use crate::storage::accessor::{EdgeAccessor, VertexAccessor};
use crate::storage::mvcc::ReadMode;
use crate::storage::record::{Edge, EdgeRef};
use crate::types::{Gid, MvccError, Result, TypeId};

use super::vertex_ops::read_mode;
use super::GraphAccessor;

impl GraphAccessor {
    /// Inserts an edge `from -> to` and records it in both endpoints'
    /// adjacency lists, source first.
    ///
    /// Both endpoints must be visible with this transaction's own writes
    /// applied. Updating an endpoint can fail with a serialization error
    /// like any other write.
    pub fn insert_edge(
        &self,
        from: Gid,
        to: Gid,
        edge_type: TypeId,
        gid: Option<Gid>,
    ) -> Result<EdgeAccessor<'_>> {
        self.check_active()?;
        let source = self.endpoint(from)?;
        let target = if from == to {
            source.clone()
        } else {
            self.endpoint(to)?
        };

        let chain = self
            .graph
            .edges
            .insert(gid, &self.tx, Edge::new(from, to, edge_type))?;
        let edge = chain.gid();
        self.graph.metrics.version_created();

        source.update_with(|vertex| {
            vertex.out_edges.push(EdgeRef {
                vertex: to,
                edge,
                edge_type,
            })
        })?;
        target.update_with(|vertex| {
            vertex.in_edges.push(EdgeRef {
                vertex: from,
                edge,
                edge_type,
            })
        })?;

        self.graph.emit(StateDelta::CreateEdge {
            tx: self.tx.id(),
            gid: edge,
            from,
            to,
            edge_type,
        });
        trace!(tx = self.tx.id().0, gid = edge.0, from = from.0, to = to.0, "graph.edge.insert");
        Ok(EdgeAccessor::new(self, chain, ReadMode::CurrentState))
    }

    /// Edge `gid` if visible to this transaction in the requested view.
    pub fn find_edge(&self, gid: Gid, current_state: bool) -> Result<Option<EdgeAccessor<'_>>> {
        self.check_active()?;
        let mode = read_mode(current_state);
        let clog = self.graph.engine.commit_log();
        Ok(self
            .graph
            .edges
            .get(gid)
            .filter(|chain| chain.is_visible(&self.tx, clog, mode))
            .map(|chain| EdgeAccessor::new(self, chain, mode)))
    }

    /// Every edge visible in the requested view, ordered by id.
    pub fn edges(&self, current_state: bool) -> Result<Vec<EdgeAccessor<'_>>> {
        self.check_active()?;
        let mode = read_mode(current_state);
        let clog = self.graph.engine.commit_log();
        Ok(self
            .graph
            .edges
            .chains()
            .into_iter()
            .filter(|chain| chain.is_visible(&self.tx, clog, mode))
            .map(|chain| EdgeAccessor::new(self, chain, mode))
            .collect())
    }

    /// Number of edges visible with this transaction's own writes applied.
    pub fn edges_count(&self) -> Result<usize> {
        Ok(self.edges(true)?.len())
    }

    /// Removes edge `gid` and drops it from both endpoints' adjacency lists,
    /// source first. Removing an edge this transaction already removed does
    /// nothing.
    pub fn remove_edge(&self, gid: Gid) -> Result<()> {
        self.check_active()?;
        let chain = self
            .graph
            .edges
            .get(gid)
            .ok_or(MvccError::EntityNotFound { gid })?;
        let clog = self.graph.engine.commit_log();
        let Some(edge) = chain.find(&self.tx, clog, ReadMode::CurrentState) else {
            if chain.history().iter().any(|info| info.expired_by == Some(self.tx.id())) {
                return Ok(());
            }
            return Err(MvccError::EntityNotFound { gid });
        };

        let source = self.endpoint(edge.from)?;
        source.update_with(|vertex| vertex.out_edges.retain(|entry| entry.edge != gid))?;
        let target = self.endpoint(edge.to)?;
        target.update_with(|vertex| vertex.in_edges.retain(|entry| entry.edge != gid))?;

        self.track(chain.remove(&self.tx, clog))?;
        self.graph.emit(StateDelta::RemoveEdge {
            tx: self.tx.id(),
            gid,
        });
        trace!(tx = self.tx.id().0, gid = gid.0, "graph.edge.remove");
        Ok(())
    }

    fn endpoint(&self, gid: Gid) -> Result<VertexAccessor<'_>> {
        self.find_vertex(gid, true)?
            .ok_or(MvccError::Invalid("edge endpoint is not visible"))
    }
}
