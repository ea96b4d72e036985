#![forbid(unsafe_code)]

//! Optimistic, atomically applied graph mutations.
//!
//! A [`PutRequest`] lists node and edge writes plus the read-time
//! observations that must still hold at commit. The [`Mutator`] turns it into
//! a single conditional write set; nothing is applied unless every condition
//! holds.

/// Planning and committing of put requests.
pub mod engine;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Edge, EdgeSide, Node};
use crate::types::{EdgeId, NodeId};

pub use engine::{Mutator, PutOptions, PutResult};

/// One write of a put request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PutEntity {
    /// Creates (version 0) or updates (version n) a node.
    Node(Node),
    /// Creates or replaces an edge.
    Edge(Edge),
    /// Removes an existing edge.
    RemoveEdge(EdgeId),
}

impl From<Node> for PutEntity {
    fn from(node: Node) -> Self {
        PutEntity::Node(node)
    }
}

impl From<Edge> for PutEntity {
    fn from(edge: Edge) -> Self {
        PutEntity::Edge(edge)
    }
}

/// Asserts that an edge with `props[prop] == value` does or does not hang off a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeByPropCheck {
    /// Node whose edges are inspected.
    pub node_id: NodeId,
    /// Edge type inspected.
    pub edge_type: String,
    /// Side of the edge the node sits on.
    pub side: EdgeSide,
    /// Property compared.
    pub prop: String,
    /// Expected value.
    pub value: Value,
    /// Whether such an edge must exist.
    pub exists: bool,
}

/// Batch of writes and commit-time checks applied atomically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRequest {
    /// Writes in request order.
    #[serde(default)]
    pub put_entities: Vec<PutEntity>,
    /// Nodes as last observed; their edge sets must be unchanged at commit.
    #[serde(default)]
    pub all_edges_check_for_nodes: Vec<Node>,
    /// Edge property assertions.
    #[serde(default)]
    pub edge_by_prop_checks: Vec<EdgeByPropCheck>,
    /// Endpoints that edge writes must not touch.
    #[serde(default)]
    pub no_edge_checks_for_node_ids: Vec<NodeId>,
    /// Disables endpoint touching for every edge write.
    #[serde(default)]
    pub without_node_edge_checks: bool,
    /// Caller-chosen id for logs; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<String>,
}

impl PutRequest {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write.
    pub fn put(mut self, entity: impl Into<PutEntity>) -> Self {
        self.put_entities.push(entity.into());
        self
    }

    /// Appends an edge removal.
    pub fn remove_edge(mut self, id: EdgeId) -> Self {
        self.put_entities.push(PutEntity::RemoveEdge(id));
        self
    }

    /// Requires the node's edge set to be unchanged since `observed` was read.
    pub fn check_all_edges(mut self, observed: Node) -> Self {
        self.all_edges_check_for_nodes.push(observed);
        self
    }

    /// Adds an edge property assertion.
    pub fn check_edge_by_prop(mut self, check: EdgeByPropCheck) -> Self {
        self.edge_by_prop_checks.push(check);
        self
    }

    /// Exempts a node from endpoint touching.
    pub fn without_edge_checks_for(mut self, id: NodeId) -> Self {
        self.no_edge_checks_for_node_ids.push(id);
        self
    }

    /// Exempts every node from endpoint touching.
    pub fn without_node_edge_checks(mut self) -> Self {
        self.without_node_edge_checks = true;
        self
    }

    /// Sets the mutation id.
    pub fn with_mutation_id(mut self, id: impl Into<String>) -> Self {
        self.mutation_id = Some(id.into());
        self
    }
}
