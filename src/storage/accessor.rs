//! Transaction-scoped handles to single vertices and edges.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::durability::StateDelta;
use crate::storage::chain::VersionChain;
use crate::storage::graph::GraphAccessor;
use crate::storage::mvcc::{ReadMode, VersionInfo};
use crate::storage::record::{Edge, EdgeRef, Props, Record, Vertex};
use crate::storage::types::PropValue;
use crate::types::{Gid, LabelId, PropId, Result, TypeId};

/// Handle to one record as seen by one transaction.
///
/// Reads go through the current view: [`ReadMode::Snapshot`] after
/// [`RecordAccessor::switch_old`] (the default) and
/// [`ReadMode::CurrentState`] after [`RecordAccessor::switch_new`]. Getters
/// return `None` when the record is not visible in that view, and once the
/// owning transaction has committed or aborted. Writes always target the
/// version the transaction may modify, regardless of the view.
pub struct RecordAccessor<'a, T: Record> {
    dba: &'a GraphAccessor,
    chain: Arc<VersionChain<T>>,
    mode: ReadMode,
}

/// Accessor for a vertex.
pub type VertexAccessor<'a> = RecordAccessor<'a, Vertex>;
/// Accessor for an edge.
pub type EdgeAccessor<'a> = RecordAccessor<'a, Edge>;

impl<'a, T: Record> RecordAccessor<'a, T> {
    pub(crate) fn new(dba: &'a GraphAccessor, chain: Arc<VersionChain<T>>, mode: ReadMode) -> Self {
        Self { dba, chain, mode }
    }

    /// Record id.
    pub fn gid(&self) -> Gid {
        self.chain.gid()
    }

    /// Version chain backing the record.
    pub fn chain(&self) -> &Arc<VersionChain<T>> {
        &self.chain
    }

    /// Read through the state at the start of the current command.
    pub fn switch_old(&mut self) -> &mut Self {
        self.mode = ReadMode::Snapshot;
        self
    }

    /// Read through the state including the current command's writes.
    pub fn switch_new(&mut self) -> &mut Self {
        self.mode = ReadMode::CurrentState;
        self
    }

    /// Current view.
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Returns `true` if some version is visible in the requested view.
    pub fn visible(&self, current_state: bool) -> bool {
        if !self.dba.is_active() {
            return false;
        }
        let mode = if current_state {
            ReadMode::CurrentState
        } else {
            ReadMode::Snapshot
        };
        self.chain
            .is_visible(self.dba.transaction(), self.dba.graph().engine().commit_log(), mode)
    }

    /// Record contents in the current view.
    pub fn record(&self) -> Option<Arc<T>> {
        if !self.dba.is_active() {
            return None;
        }
        self.chain.find(
            self.dba.transaction(),
            self.dba.graph().engine().commit_log(),
            self.mode,
        )
    }

    /// One property value in the current view.
    pub fn property(&self, prop: PropId) -> Option<PropValue> {
        self.record().and_then(|record| record.props().get(&prop).cloned())
    }

    /// All properties in the current view.
    pub fn properties(&self) -> Option<Props> {
        self.record().map(|record| record.props().clone())
    }

    /// Stamps of every linked version, newest first.
    pub fn history(&self) -> Vec<VersionInfo> {
        self.chain.history()
    }

    /// Publishes a new version built by `f` from the writable one.
    pub(crate) fn update_with(&self, f: impl FnOnce(&mut T)) -> Result<Arc<T>> {
        self.dba.check_active()?;
        let clog = self.dba.graph().engine().commit_log();
        let result = self.chain.update(self.dba.transaction(), clog, |current| {
            let mut next = current.clone();
            f(&mut next);
            next
        });
        let record = self.dba.track(result)?;
        self.dba.graph().metrics().version_created();
        Ok(record)
    }

    fn write_property(&self, prop: PropId, value: &PropValue) -> Result<Arc<T>> {
        self.update_with(|record| {
            if value.is_null() {
                record.props_mut().remove(&prop);
            } else {
                record.props_mut().insert(prop, value.clone());
            }
        })
    }
}

impl<'a> RecordAccessor<'a, Vertex> {
    /// Labels in the current view.
    pub fn labels(&self) -> Option<SmallVec<[LabelId; 4]>> {
        self.record().map(|vertex| vertex.labels.clone())
    }

    /// Returns `true` if the vertex carries `label` in the current view.
    pub fn has_label(&self, label: LabelId) -> bool {
        self.record().is_some_and(|vertex| vertex.has_label(label))
    }

    /// Adds `label`; returns `false` if the vertex already had it.
    pub fn add_label(&self, label: LabelId) -> Result<bool> {
        let mut added = false;
        let vertex = self.update_with(|vertex| {
            if !vertex.has_label(label) {
                vertex.labels.push(label);
                added = true;
            }
        })?;
        if added {
            let tx = self.dba.transaction();
            self.dba.graph().emit(StateDelta::AddLabel {
                tx: tx.id(),
                gid: self.gid(),
                label,
            });
            self.dba
                .graph()
                .indexes()
                .on_label(label, &self.chain, &vertex, tx);
        }
        Ok(added)
    }

    /// Removes `label`; returns `false` if the vertex did not have it.
    pub fn remove_label(&self, label: LabelId) -> Result<bool> {
        let mut removed = false;
        self.update_with(|vertex| {
            let before = vertex.labels.len();
            vertex.labels.retain(|existing| *existing != label);
            removed = vertex.labels.len() != before;
        })?;
        if removed {
            self.dba.graph().emit(StateDelta::RemoveLabel {
                tx: self.dba.transaction().id(),
                gid: self.gid(),
                label,
            });
        }
        Ok(removed)
    }

    /// Sets a property; [`PropValue::Null`] removes it.
    pub fn set_property(&self, prop: PropId, value: impl Into<PropValue>) -> Result<()> {
        let value = value.into();
        let vertex = self.write_property(prop, &value)?;
        let tx = self.dba.transaction();
        let removed = value.is_null();
        self.dba.graph().emit(StateDelta::SetVertexProperty {
            tx: tx.id(),
            gid: self.gid(),
            prop,
            value,
        });
        if !removed {
            self.dba
                .graph()
                .indexes()
                .on_property(prop, &self.chain, &vertex, tx);
        }
        Ok(())
    }

    /// Removes a property.
    pub fn remove_property(&self, prop: PropId) -> Result<()> {
        self.set_property(prop, PropValue::Null)
    }

    /// Outgoing edges in the current view.
    pub fn out_edges(&self) -> Option<Vec<EdgeRef>> {
        self.record().map(|vertex| vertex.out_edges.clone())
    }

    /// Incoming edges in the current view.
    pub fn in_edges(&self) -> Option<Vec<EdgeRef>> {
        self.record().map(|vertex| vertex.in_edges.clone())
    }

    /// Number of outgoing edges in the current view.
    pub fn out_degree(&self) -> Option<usize> {
        self.record().map(|vertex| vertex.out_edges.len())
    }

    /// Number of incoming edges in the current view.
    pub fn in_degree(&self) -> Option<usize> {
        self.record().map(|vertex| vertex.in_edges.len())
    }
}

impl<'a> RecordAccessor<'a, Edge> {
    /// Source vertex.
    pub fn from(&self) -> Option<Gid> {
        self.record().map(|edge| edge.from)
    }

    /// Destination vertex.
    pub fn to(&self) -> Option<Gid> {
        self.record().map(|edge| edge.to)
    }

    /// Edge type.
    pub fn edge_type(&self) -> Option<TypeId> {
        self.record().map(|edge| edge.edge_type)
    }

    /// Sets a property; [`PropValue::Null`] removes it.
    pub fn set_property(&self, prop: PropId, value: impl Into<PropValue>) -> Result<()> {
        let value = value.into();
        self.write_property(prop, &value)?;
        self.dba.graph().emit(StateDelta::SetEdgeProperty {
            tx: self.dba.transaction().id(),
            gid: self.gid(),
            prop,
            value,
        });
        Ok(())
    }

    /// Removes a property.
    pub fn remove_property(&self, prop: PropId) -> Result<()> {
        self.set_property(prop, PropValue::Null)
    }
}

impl<T: Record> Clone for RecordAccessor<'_, T> {
    fn clone(&self) -> Self {
        Self {
            dba: self.dba,
            chain: Arc::clone(&self.chain),
            mode: self.mode,
        }
    }
}

impl<T: Record> fmt::Debug for RecordAccessor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordAccessor")
            .field("kind", &T::KIND)
            .field("gid", &self.gid().0)
            .field("mode", &self.mode)
            .finish()
    }
}
