//! Node, edge and entity model persisted as triples.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{EdgeId, NodeId, NodeVersion};

/// Schemaless property bag.
pub type Props = Map<String, Value>;

/// Optimistic-concurrency bookkeeping carried by every node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetail {
    /// Zero for a node that was never written.
    pub node_version: NodeVersion,
}

/// Typed graph node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Typed global id.
    pub id: NodeId,
    /// Version last read (or written) by the holder of this value.
    #[serde(default)]
    pub version_detail: VersionDetail,
    /// Creation time in unix milliseconds.
    #[serde(default)]
    pub created_at: i64,
    /// Last write time in unix milliseconds.
    #[serde(default)]
    pub updated_at: i64,
    /// Soft-delete marker in unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    /// Type-specific properties.
    #[serde(default)]
    pub props: Props,
}

impl Node {
    /// Creates an unversioned node (a create when put).
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            version_detail: VersionDetail::default(),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            props: Props::new(),
        }
    }

    /// Sets a property, returning the node.
    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Type name taken from the id.
    pub fn type_name(&self) -> &str {
        self.id.type_name()
    }

    /// Current node version.
    pub fn version(&self) -> NodeVersion {
        self.version_detail.node_version
    }

    /// Returns a property value.
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Returns `true` when the node carries a soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Typed edge between two nodes. Edges carry no version of their own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Edge type name.
    pub edge_type: String,
    /// Node on the `in` end.
    pub in_id: NodeId,
    /// Node on the `out` end.
    pub out_id: NodeId,
    /// Type-specific properties.
    #[serde(default)]
    pub props: Props,
}

impl Edge {
    /// Creates an edge without properties.
    pub fn new(edge_type: impl Into<String>, in_id: NodeId, out_id: NodeId) -> Self {
        Self {
            edge_type: edge_type.into(),
            in_id,
            out_id,
            props: Props::new(),
        }
    }

    /// Sets a property, returning the edge.
    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Identity of this edge.
    pub fn id(&self) -> EdgeId {
        EdgeId::new(self.edge_type.clone(), self.in_id.clone(), self.out_id.clone())
    }

    /// Returns a property value.
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }
}

/// Which end of an edge a node sits on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeSide {
    /// The node is the edge's `in_id`.
    In,
    /// The node is the edge's `out_id`.
    Out,
}

impl EdgeSide {
    /// Endpoint of `edge` on this side.
    pub fn endpoint<'a>(&self, edge: &'a Edge) -> &'a NodeId {
        match self {
            EdgeSide::In => &edge.in_id,
            EdgeSide::Out => &edge.out_id,
        }
    }

    /// Endpoint on the opposite side.
    pub fn opposite<'a>(&self, edge: &'a Edge) -> &'a NodeId {
        match self {
            EdgeSide::In => &edge.out_id,
            EdgeSide::Out => &edge.in_id,
        }
    }
}

/// Either side of the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Entity {
    /// A node.
    Node(Node),
    /// An edge.
    Edge(Edge),
}

impl Entity {
    /// Properties of the wrapped entity.
    pub fn props(&self) -> &Props {
        match self {
            Entity::Node(node) => &node.props,
            Entity::Edge(edge) => &edge.props,
        }
    }

    /// Returns the node if this entity is one.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entity::Node(node) => Some(node),
            Entity::Edge(_) => None,
        }
    }

    /// Returns the edge if this entity is one.
    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Entity::Edge(edge) => Some(edge),
            Entity::Node(_) => None,
        }
    }

    /// Consumes the entity, returning the node if it is one.
    pub fn into_node(self) -> Option<Node> {
        match self {
            Entity::Node(node) => Some(node),
            Entity::Edge(_) => None,
        }
    }

    /// Consumes the entity, returning the edge if it is one.
    pub fn into_edge(self) -> Option<Edge> {
        match self {
            Entity::Edge(edge) => Some(edge),
            Entity::Node(_) => None,
        }
    }
}

impl From<Node> for Entity {
    fn from(value: Node) -> Self {
        Entity::Node(value)
    }
}

impl From<Edge> for Entity {
    fn from(value: Edge) -> Self {
        Entity::Edge(value)
    }
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as i64
}
