//! Record payloads stored in version chains.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::types::PropValue;
use crate::types::{Gid, LabelId, PropId, TypeId};

/// Property map shared by vertices and edges.
pub type Props = BTreeMap<PropId, PropValue>;

/// Kind of record, shown in accessor diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    /// Vertex record.
    Vertex,
    /// Edge record.
    Edge,
}

/// Behaviour common to record payloads.
pub trait Record: Clone + Send + Sync + 'static {
    /// Kind of the record.
    const KIND: RecordKind;

    /// Property map.
    fn props(&self) -> &Props;

    /// Mutable property map.
    fn props_mut(&mut self) -> &mut Props;
}

/// One endpoint entry in a vertex adjacency list.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EdgeRef {
    /// Vertex at the other end of the edge.
    pub vertex: Gid,
    /// The edge itself.
    pub edge: Gid,
    /// Edge type.
    pub edge_type: TypeId,
}

/// Vertex payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Labels in insertion order, without duplicates.
    pub labels: SmallVec<[LabelId; 4]>,
    /// Properties.
    pub props: Props,
    /// Edges leaving the vertex.
    pub out_edges: Vec<EdgeRef>,
    /// Edges arriving at the vertex.
    pub in_edges: Vec<EdgeRef>,
}

impl Vertex {
    /// Returns `true` if the vertex carries `label`.
    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Returns `true` when no edge is attached.
    pub fn is_isolated(&self) -> bool {
        self.out_edges.is_empty() && self.in_edges.is_empty()
    }
}

impl Record for Vertex {
    const KIND: RecordKind = RecordKind::Vertex;

    fn props(&self) -> &Props {
        &self.props
    }

    fn props_mut(&mut self) -> &mut Props {
        &mut self.props
    }
}

/// Edge payload. Endpoints and type never change after insertion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source vertex.
    pub from: Gid,
    /// Destination vertex.
    pub to: Gid,
    /// Edge type.
    pub edge_type: TypeId,
    /// Properties.
    pub props: Props,
}

impl Edge {
    /// Creates an edge without properties.
    pub fn new(from: Gid, to: Gid, edge_type: TypeId) -> Self {
        Self {
            from,
            to,
            edge_type,
            props: Props::new(),
        }
    }
}

impl Record for Edge {
    const KIND: RecordKind = RecordKind::Edge;

    fn props(&self) -> &Props {
        &self.props
    }

    fn props_mut(&mut self) -> &mut Props {
        &mut self.props
    }
}
