//! Query node catalogue.
//!
//! Identity nodes and reductions yield at most one entity; connection nodes
//! yield a page. Connection nodes carry a [`ConnectionSpec`] that the
//! `with_*` setters update; every other kind rejects them.

use serde::{Deserialize, Serialize};

use super::filter::{EdgePredicate, Filter, NodePredicate, Order};
use super::pagination::ConnectionArguments;
use crate::model::{EdgeSide, Node};
use crate::types::{EdgeId, NodeId, NodeVersion, Result, StrataError};

/// Paging and scan settings of a connection node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionSpec {
    /// Caller page arguments; only honoured on the paginating root.
    pub page: ConnectionArguments,
    /// Page size used when `page` names no count.
    pub connection_size: Option<usize>,
    /// Rows requested per storage round.
    pub pre_filtered_size: Option<usize>,
    /// Strongly consistent reads.
    pub consistent_read: bool,
    /// Free-form label carried into logs and results.
    pub tag: Option<String>,
    /// Property filter applied to every storage round.
    pub filter: Option<Filter>,
    /// Scan order.
    pub order: Order,
}

/// Typed hop along one edge type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedHop {
    /// Edge type followed.
    pub edge_type: String,
    /// Restricts the hop to opposite endpoints of this node type.
    pub endpoint_type: Option<String>,
}

/// How a reduction collapses a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    /// First item; not found when empty.
    First,
    /// First item or nothing.
    FirstOrDefault,
    /// Exactly one item.
    Single,
    /// Zero or one item.
    SingleOrDefault,
}

impl Reduction {
    /// Items pulled from the connection to decide the outcome.
    pub fn probe_size(self) -> usize {
        match self {
            Reduction::First | Reduction::FirstOrDefault => 1,
            Reduction::Single | Reduction::SingleOrDefault => 2,
        }
    }

    /// Returns `true` when an empty connection resolves to nothing instead of failing.
    pub fn allows_empty(self) -> bool {
        matches!(self, Reduction::FirstOrDefault | Reduction::SingleOrDefault)
    }
}

/// What kind of entity a node yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// Nodes.
    Node,
    /// Edges.
    Edge,
}

/// Whether a node yields one entity or a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// At most one entity.
    Single,
    /// A paginated connection.
    Connection,
}

/// One step of a query.
#[derive(Clone, Debug)]
pub enum QueryNode {
    /// Node by id; not found when missing.
    NodeById {
        /// Node id.
        id: NodeId,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// Node by id or nothing.
    NodeOrDefaultById {
        /// Node id.
        id: NodeId,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// Re-reads the stored copy of a node the caller already holds.
    NodeByNode {
        /// Caller's copy.
        node: Node,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// Node by id, asserting its stored version.
    NodeVersionById {
        /// Node id.
        id: NodeId,
        /// Expected version.
        version: NodeVersion,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// Edge by id; not found when missing.
    EdgeById {
        /// Edge id.
        id: EdgeId,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// Edge by id or nothing.
    EdgeOrDefaultById {
        /// Edge id.
        id: EdgeId,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// All live nodes of a type.
    NodeConnection {
        /// Node type scanned.
        type_name: String,
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Typed edges whose `in` endpoint is the source node.
    InToEdgeConnection {
        /// Edge type and endpoint narrowing.
        hop: TypedHop,
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Typed edges whose `out` endpoint is the source node.
    OutToEdgeConnection {
        /// Edge type and endpoint narrowing.
        hop: TypedHop,
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Every edge whose `in` endpoint is the source node.
    InToAllEdgeConnection {
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Every edge whose `out` endpoint is the source node.
    OutToAllEdgeConnection {
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Typed edges touching the source node on either side.
    InAndOutToEdgeConnection {
        /// Edge type followed.
        edge_type: String,
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// `in` endpoints of the child edges.
    InFromEdgeConnection {
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// `out` endpoints of the child edges.
    OutFromEdgeConnection {
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Round-robin interleave of the child node connections.
    ZipNodeConnection {
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Child node connection narrowed by a predicate.
    WhereNodeConnection {
        /// Predicate applied to each node.
        predicate: NodePredicate,
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Child edge connection narrowed by a predicate.
    WhereEdgeConnection {
        /// Predicate applied to each edge.
        predicate: EdgePredicate,
        /// Paging settings.
        spec: ConnectionSpec,
    },
    /// Collapses the child node connection to one node.
    ReduceNode {
        /// Reduction mode.
        mode: Reduction,
        /// Strongly consistent read.
        consistent_read: bool,
    },
    /// Collapses the child edge connection to one edge.
    ReduceEdge {
        /// Reduction mode.
        mode: Reduction,
        /// Strongly consistent read.
        consistent_read: bool,
    },
}

impl QueryNode {
    /// Node lookup that fails when missing.
    pub fn node_by_id(id: NodeId) -> Self {
        QueryNode::NodeById {
            id,
            consistent_read: false,
        }
    }

    /// Node lookup that resolves to nothing when missing.
    pub fn node_or_default_by_id(id: NodeId) -> Self {
        QueryNode::NodeOrDefaultById {
            id,
            consistent_read: false,
        }
    }

    /// Re-read of a node the caller holds.
    pub fn node_by_node(node: Node) -> Self {
        QueryNode::NodeByNode {
            node,
            consistent_read: false,
        }
    }

    /// Node lookup asserting a version.
    pub fn node_version_by_id(id: NodeId, version: NodeVersion) -> Self {
        QueryNode::NodeVersionById {
            id,
            version,
            consistent_read: false,
        }
    }

    /// Edge lookup that fails when missing.
    pub fn edge_by_id(id: EdgeId) -> Self {
        QueryNode::EdgeById {
            id,
            consistent_read: false,
        }
    }

    /// Edge lookup that resolves to nothing when missing.
    pub fn edge_or_default_by_id(id: EdgeId) -> Self {
        QueryNode::EdgeOrDefaultById {
            id,
            consistent_read: false,
        }
    }

    /// Scan of every node of a type.
    pub fn node_connection(type_name: impl Into<String>) -> Self {
        QueryNode::NodeConnection {
            type_name: type_name.into(),
            spec: ConnectionSpec::default(),
        }
    }

    /// Typed hop from a node along edges where it is the `side` endpoint.
    pub fn to_edge_connection(
        side: EdgeSide,
        edge_type: impl Into<String>,
        endpoint_type: Option<String>,
    ) -> Self {
        let hop = TypedHop {
            edge_type: edge_type.into(),
            endpoint_type,
        };
        let spec = ConnectionSpec::default();
        match side {
            EdgeSide::In => QueryNode::InToEdgeConnection { hop, spec },
            EdgeSide::Out => QueryNode::OutToEdgeConnection { hop, spec },
        }
    }

    /// Every edge whose `in` endpoint is the source.
    pub fn in_to_all_edge_connection() -> Self {
        QueryNode::InToAllEdgeConnection {
            spec: ConnectionSpec::default(),
        }
    }

    /// Every edge whose `out` endpoint is the source.
    pub fn out_to_all_edge_connection() -> Self {
        QueryNode::OutToAllEdgeConnection {
            spec: ConnectionSpec::default(),
        }
    }

    /// Typed edges on both sides of the source.
    pub fn in_and_out_to_edge_connection(edge_type: impl Into<String>) -> Self {
        QueryNode::InAndOutToEdgeConnection {
            edge_type: edge_type.into(),
            spec: ConnectionSpec::default(),
        }
    }

    /// Resolution of the child edges' `side` endpoints.
    pub fn from_edge_connection(side: EdgeSide) -> Self {
        let spec = ConnectionSpec::default();
        match side {
            EdgeSide::In => QueryNode::InFromEdgeConnection { spec },
            EdgeSide::Out => QueryNode::OutFromEdgeConnection { spec },
        }
    }

    /// Round-robin interleave of the children.
    pub fn zip_node_connection() -> Self {
        QueryNode::ZipNodeConnection {
            spec: ConnectionSpec::default(),
        }
    }

    /// Node predicate over the child connection.
    pub fn where_node(predicate: NodePredicate) -> Self {
        QueryNode::WhereNodeConnection {
            predicate,
            spec: ConnectionSpec::default(),
        }
    }

    /// Edge predicate over the child connection.
    pub fn where_edge(predicate: EdgePredicate) -> Self {
        QueryNode::WhereEdgeConnection {
            predicate,
            spec: ConnectionSpec::default(),
        }
    }

    /// Node reduction.
    pub fn reduce_node(mode: Reduction) -> Self {
        QueryNode::ReduceNode {
            mode,
            consistent_read: false,
        }
    }

    /// Edge reduction.
    pub fn reduce_edge(mode: Reduction) -> Self {
        QueryNode::ReduceEdge {
            mode,
            consistent_read: false,
        }
    }

    /// Variant name, used in errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryNode::NodeById { .. } => "NodeById",
            QueryNode::NodeOrDefaultById { .. } => "NodeOrDefaultById",
            QueryNode::NodeByNode { .. } => "NodeByNode",
            QueryNode::NodeVersionById { .. } => "NodeVersionById",
            QueryNode::EdgeById { .. } => "EdgeById",
            QueryNode::EdgeOrDefaultById { .. } => "EdgeOrDefaultById",
            QueryNode::NodeConnection { .. } => "NodeConnection",
            QueryNode::InToEdgeConnection { .. } => "InToEdgeConnection",
            QueryNode::OutToEdgeConnection { .. } => "OutToEdgeConnection",
            QueryNode::InToAllEdgeConnection { .. } => "InToAllEdgeConnection",
            QueryNode::OutToAllEdgeConnection { .. } => "OutToAllEdgeConnection",
            QueryNode::InAndOutToEdgeConnection { .. } => "InAndOutToEdgeConnection",
            QueryNode::InFromEdgeConnection { .. } => "InFromEdgeConnection",
            QueryNode::OutFromEdgeConnection { .. } => "OutFromEdgeConnection",
            QueryNode::ZipNodeConnection { .. } => "ZipNodeConnection",
            QueryNode::WhereNodeConnection { .. } => "WhereNodeConnection",
            QueryNode::WhereEdgeConnection { .. } => "WhereEdgeConnection",
            QueryNode::ReduceNode { .. } => "ReduceNode",
            QueryNode::ReduceEdge { .. } => "ReduceEdge",
        }
    }

    /// Entity kind yielded.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            QueryNode::NodeById { .. }
            | QueryNode::NodeOrDefaultById { .. }
            | QueryNode::NodeByNode { .. }
            | QueryNode::NodeVersionById { .. }
            | QueryNode::NodeConnection { .. }
            | QueryNode::InFromEdgeConnection { .. }
            | QueryNode::OutFromEdgeConnection { .. }
            | QueryNode::ZipNodeConnection { .. }
            | QueryNode::WhereNodeConnection { .. }
            | QueryNode::ReduceNode { .. } => EntityKind::Node,
            QueryNode::EdgeById { .. }
            | QueryNode::EdgeOrDefaultById { .. }
            | QueryNode::InToEdgeConnection { .. }
            | QueryNode::OutToEdgeConnection { .. }
            | QueryNode::InToAllEdgeConnection { .. }
            | QueryNode::OutToAllEdgeConnection { .. }
            | QueryNode::InAndOutToEdgeConnection { .. }
            | QueryNode::WhereEdgeConnection { .. }
            | QueryNode::ReduceEdge { .. } => EntityKind::Edge,
        }
    }

    /// Single entity or connection.
    pub fn shape(&self) -> Shape {
        if self.connection_spec().is_some() {
            Shape::Connection
        } else {
            Shape::Single
        }
    }

    /// Returns `true` for connection nodes.
    pub fn is_connection(&self) -> bool {
        self.shape() == Shape::Connection
    }

    /// Returns `true` when the node starts its own pagination domain: identity
    /// lookups and reductions terminate a parent's cursor.
    pub fn is_cursor_boundary(&self) -> bool {
        !self.is_connection()
    }

    /// Paging settings of a connection node.
    pub fn connection_spec(&self) -> Option<&ConnectionSpec> {
        match self {
            QueryNode::NodeConnection { spec, .. }
            | QueryNode::InToEdgeConnection { spec, .. }
            | QueryNode::OutToEdgeConnection { spec, .. }
            | QueryNode::InToAllEdgeConnection { spec }
            | QueryNode::OutToAllEdgeConnection { spec }
            | QueryNode::InAndOutToEdgeConnection { spec, .. }
            | QueryNode::InFromEdgeConnection { spec }
            | QueryNode::OutFromEdgeConnection { spec }
            | QueryNode::ZipNodeConnection { spec }
            | QueryNode::WhereNodeConnection { spec, .. }
            | QueryNode::WhereEdgeConnection { spec, .. } => Some(spec),
            _ => None,
        }
    }

    fn connection_spec_mut(&mut self) -> Option<&mut ConnectionSpec> {
        match self {
            QueryNode::NodeConnection { spec, .. }
            | QueryNode::InToEdgeConnection { spec, .. }
            | QueryNode::OutToEdgeConnection { spec, .. }
            | QueryNode::InToAllEdgeConnection { spec }
            | QueryNode::OutToAllEdgeConnection { spec }
            | QueryNode::InAndOutToEdgeConnection { spec, .. }
            | QueryNode::InFromEdgeConnection { spec }
            | QueryNode::OutFromEdgeConnection { spec }
            | QueryNode::ZipNodeConnection { spec }
            | QueryNode::WhereNodeConnection { spec, .. }
            | QueryNode::WhereEdgeConnection { spec, .. } => Some(spec),
            _ => None,
        }
    }

    fn with_spec(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut ConnectionSpec),
    ) -> Result<Self> {
        let mut next = self.clone();
        let kind = self.kind();
        let spec = next
            .connection_spec_mut()
            .ok_or(StrataError::Unsupported { operation, kind })?;
        f(spec);
        Ok(next)
    }

    /// Copy positioned after `cursor`.
    pub fn with_cursor(&self, cursor: impl Into<String>) -> Result<Self> {
        let cursor = cursor.into();
        self.with_spec("with_cursor", |spec| {
            spec.page.after = Some(cursor);
            spec.page.before = None;
            spec.page.last = None;
        })
    }

    /// Copy with a page size.
    pub fn with_connection_size(&self, size: usize) -> Result<Self> {
        self.with_spec("with_connection_size", |spec| spec.connection_size = Some(size))
    }

    /// Copy with a per-round storage batch size.
    pub fn with_pre_filtered_connection_size(&self, size: usize) -> Result<Self> {
        self.with_spec("with_pre_filtered_connection_size", |spec| {
            spec.pre_filtered_size = Some(size)
        })
    }

    /// Copy with full page arguments.
    pub fn with_connection_arguments(&self, page: ConnectionArguments) -> Result<Self> {
        page.validate()?;
        self.with_spec("with_connection_arguments", |spec| spec.page = page)
    }

    /// Copy with a property filter.
    pub fn with_filter(&self, filter: Filter) -> Result<Self> {
        self.with_spec("with_filter", |spec| spec.filter = Some(filter))
    }

    /// Copy with a scan order.
    pub fn with_order(&self, order: Order) -> Result<Self> {
        if order.prop.is_some() && !matches!(self, QueryNode::NodeConnection { .. }) {
            return Err(StrataError::Unsupported {
                operation: "order by property",
                kind: self.kind(),
            });
        }
        self.with_spec("with_order", |spec| spec.order = order)
    }

    /// Copy with a tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        self.with_spec("with_tag", |spec| spec.tag = Some(tag))
    }

    /// Copy with the consistency flag set; accepted by every kind.
    pub fn with_consistent_read(&self, consistent: bool) -> Self {
        let mut next = self.clone();
        match &mut next {
            QueryNode::NodeById { consistent_read, .. }
            | QueryNode::NodeOrDefaultById { consistent_read, .. }
            | QueryNode::NodeByNode { consistent_read, .. }
            | QueryNode::NodeVersionById { consistent_read, .. }
            | QueryNode::EdgeById { consistent_read, .. }
            | QueryNode::EdgeOrDefaultById { consistent_read, .. }
            | QueryNode::ReduceNode { consistent_read, .. }
            | QueryNode::ReduceEdge { consistent_read, .. } => *consistent_read = consistent,
            other => {
                if let Some(spec) = other.connection_spec_mut() {
                    spec.consistent_read = consistent;
                }
            }
        }
        next
    }

    /// Consistency flag.
    pub fn consistent_read(&self) -> bool {
        match self {
            QueryNode::NodeById { consistent_read, .. }
            | QueryNode::NodeOrDefaultById { consistent_read, .. }
            | QueryNode::NodeByNode { consistent_read, .. }
            | QueryNode::NodeVersionById { consistent_read, .. }
            | QueryNode::EdgeById { consistent_read, .. }
            | QueryNode::EdgeOrDefaultById { consistent_read, .. }
            | QueryNode::ReduceNode { consistent_read, .. }
            | QueryNode::ReduceEdge { consistent_read, .. } => *consistent_read,
            other => other
                .connection_spec()
                .map(|spec| spec.consistent_read)
                .unwrap_or(false),
        }
    }

    /// Page arguments of a connection node.
    pub fn page(&self) -> Option<&ConnectionArguments> {
        self.connection_spec().map(|spec| &spec.page)
    }

    /// Configured page size.
    pub fn connection_size(&self) -> Option<usize> {
        self.connection_spec().and_then(|spec| spec.connection_size)
    }

    /// Configured storage batch size.
    pub fn pre_filtered_size(&self) -> Option<usize> {
        self.connection_spec().and_then(|spec| spec.pre_filtered_size)
    }

    /// Tag of a connection node.
    pub fn tag(&self) -> Option<&str> {
        self.connection_spec().and_then(|spec| spec.tag.as_deref())
    }

    /// Allowed child count as `(min, max)`.
    pub(crate) fn arity(&self) -> (usize, usize) {
        match self {
            QueryNode::NodeById { .. }
            | QueryNode::NodeOrDefaultById { .. }
            | QueryNode::NodeByNode { .. }
            | QueryNode::NodeVersionById { .. }
            | QueryNode::EdgeById { .. }
            | QueryNode::EdgeOrDefaultById { .. }
            | QueryNode::NodeConnection { .. } => (0, 0),
            QueryNode::ZipNodeConnection { .. } => (1, usize::MAX),
            _ => (1, 1),
        }
    }

    /// Kind and shape a child must have, if constrained.
    pub(crate) fn child_requirement(&self) -> Option<(EntityKind, Option<Shape>)> {
        match self {
            QueryNode::InToEdgeConnection { .. }
            | QueryNode::OutToEdgeConnection { .. }
            | QueryNode::InToAllEdgeConnection { .. }
            | QueryNode::OutToAllEdgeConnection { .. }
            | QueryNode::InAndOutToEdgeConnection { .. } => Some((EntityKind::Node, None)),
            QueryNode::InFromEdgeConnection { .. } | QueryNode::OutFromEdgeConnection { .. } => {
                Some((EntityKind::Edge, None))
            }
            QueryNode::ZipNodeConnection { .. }
            | QueryNode::WhereNodeConnection { .. }
            | QueryNode::ReduceNode { .. } => Some((EntityKind::Node, Some(Shape::Connection))),
            QueryNode::WhereEdgeConnection { .. } | QueryNode::ReduceEdge { .. } => {
                Some((EntityKind::Edge, Some(Shape::Connection)))
            }
            _ => None,
        }
    }
}
