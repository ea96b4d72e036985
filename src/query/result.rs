//! Per-node execution results.

use std::collections::BTreeMap;

use crate::model::{Edge, Node};
use crate::types::{Result, StrataError};

use super::pagination::{Connection, PageInfo};

/// Execution facts recorded for one query node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultMeta {
    /// Encoded cursor of the last item the node emitted.
    pub cursor: Option<String>,
    /// Encoded child fragment of that cursor.
    pub child_cursor: Option<String>,
    /// The node had to fetch again because a round came back short after filtering.
    pub needs_more_data: bool,
    /// More items were available when execution stopped.
    pub has_more_data: bool,
    /// Items emitted.
    pub item_count: usize,
    /// Storage round trips issued by the node itself.
    pub storage_rounds: usize,
    /// Tag copied from the node's connection settings.
    pub tag: Option<String>,
}

/// Single-node outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeResult {
    /// The node, when found.
    pub node: Option<Node>,
    /// Execution facts.
    pub meta: ResultMeta,
}

/// Single-edge outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeResult {
    /// The edge, when found.
    pub edge: Option<Edge>,
    /// Execution facts.
    pub meta: ResultMeta,
}

/// Node connection outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeConnectionResult {
    /// Items emitted by the node. Inner nodes report what their parent consumed.
    pub connection: Connection<Node>,
    /// Execution facts.
    pub meta: ResultMeta,
}

/// Edge connection outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeConnectionResult {
    /// Items emitted by the node. Inner nodes report what their parent consumed.
    pub connection: Connection<Edge>,
    /// Execution facts.
    pub meta: ResultMeta,
}

/// Result of one query node, keyed by query key in [`ExecutionResult`](super::ExecutionResult).
#[derive(Clone, Debug, PartialEq)]
pub enum GraphResult {
    /// A node lookup or node reduction.
    Node(NodeResult),
    /// An edge lookup or edge reduction.
    Edge(EdgeResult),
    /// A node connection.
    NodeConnection(NodeConnectionResult),
    /// An edge connection.
    EdgeConnection(EdgeConnectionResult),
}

impl GraphResult {
    /// Variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            GraphResult::Node(_) => "NodeResult",
            GraphResult::Edge(_) => "EdgeResult",
            GraphResult::NodeConnection(_) => "NodeConnectionResult",
            GraphResult::EdgeConnection(_) => "EdgeConnectionResult",
        }
    }

    /// Execution facts.
    pub fn meta(&self) -> &ResultMeta {
        match self {
            GraphResult::Node(r) => &r.meta,
            GraphResult::Edge(r) => &r.meta,
            GraphResult::NodeConnection(r) => &r.meta,
            GraphResult::EdgeConnection(r) => &r.meta,
        }
    }

    fn wrong(&self, operation: &'static str) -> StrataError {
        StrataError::Unsupported {
            operation,
            kind: self.kind(),
        }
    }

    /// The node of a node result.
    pub fn node(&self) -> Result<Option<&Node>> {
        match self {
            GraphResult::Node(r) => Ok(r.node.as_ref()),
            _ => Err(self.wrong("node")),
        }
    }

    /// The edge of an edge result.
    pub fn edge(&self) -> Result<Option<&Edge>> {
        match self {
            GraphResult::Edge(r) => Ok(r.edge.as_ref()),
            _ => Err(self.wrong("edge")),
        }
    }

    /// The page of a node connection result.
    pub fn node_connection(&self) -> Result<&Connection<Node>> {
        match self {
            GraphResult::NodeConnection(r) => Ok(&r.connection),
            _ => Err(self.wrong("node_connection")),
        }
    }

    /// The page of an edge connection result.
    pub fn edge_connection(&self) -> Result<&Connection<Edge>> {
        match self {
            GraphResult::EdgeConnection(r) => Ok(&r.connection),
            _ => Err(self.wrong("edge_connection")),
        }
    }

    /// Page info of a connection result.
    pub fn page_info(&self) -> Result<&PageInfo> {
        match self {
            GraphResult::NodeConnection(r) => Ok(&r.connection.page_info),
            GraphResult::EdgeConnection(r) => Ok(&r.connection.page_info),
            _ => Err(self.wrong("page_info")),
        }
    }
}

/// Materialised output of the root node.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutput {
    /// Root was a node lookup or node reduction.
    Node(Option<Node>),
    /// Root was an edge lookup or edge reduction.
    Edge(Option<Edge>),
    /// Root was a node connection.
    Nodes(Connection<Node>),
    /// Root was an edge connection.
    Edges(Connection<Edge>),
}

impl QueryOutput {
    /// Single node, failing on other outputs.
    pub fn into_node(self) -> Result<Option<Node>> {
        match self {
            QueryOutput::Node(node) => Ok(node),
            other => Err(other.wrong("into_node")),
        }
    }

    /// Single edge, failing on other outputs.
    pub fn into_edge(self) -> Result<Option<Edge>> {
        match self {
            QueryOutput::Edge(edge) => Ok(edge),
            other => Err(other.wrong("into_edge")),
        }
    }

    /// Node page, failing on other outputs.
    pub fn into_nodes(self) -> Result<Connection<Node>> {
        match self {
            QueryOutput::Nodes(conn) => Ok(conn),
            other => Err(other.wrong("into_nodes")),
        }
    }

    /// Edge page, failing on other outputs.
    pub fn into_edges(self) -> Result<Connection<Edge>> {
        match self {
            QueryOutput::Edges(conn) => Ok(conn),
            other => Err(other.wrong("into_edges")),
        }
    }

    fn wrong(&self, operation: &'static str) -> StrataError {
        let kind = match self {
            QueryOutput::Node(_) => "node output",
            QueryOutput::Edge(_) => "edge output",
            QueryOutput::Nodes(_) => "node connection output",
            QueryOutput::Edges(_) => "edge connection output",
        };
        StrataError::Unsupported { operation, kind }
    }
}

/// Everything an execution produced.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    /// Key of the root query node.
    pub root_key: String,
    /// Root output.
    pub output: QueryOutput,
    /// Result of every evaluated node, keyed by query key.
    pub results: BTreeMap<String, GraphResult>,
}

impl ExecutionResult {
    /// Result recorded for `key`.
    pub fn result(&self, key: &str) -> Result<&GraphResult> {
        self.results
            .get(key)
            .ok_or_else(|| StrataError::Contract(format!("no result recorded for {key}")))
    }

    /// Result of the root node.
    pub fn root(&self) -> Result<&GraphResult> {
        self.result(&self.root_key)
    }
}
