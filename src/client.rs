//! Fluent client over the executor and the mutator.
//!
//! Builders append one [`QueryNode`] per call; the node added last is the
//! root. Keys are assigned in insertion order (`"0"`, `"1"`, ...) and zipped
//! branches are grafted under `"{index}."` prefixes, so the same chain of
//! calls always produces the same tree and cursors stay valid across calls.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::model::{Edge, EdgeSide, Node};
use crate::mutation::{Mutator, PutOptions, PutRequest, PutResult};
use crate::query::{
    Connection, ConnectionArguments, ExecuteOptions, ExecutionResult, Executor, Filter, Order,
    Predicate, QueryNode, QueryTree, Reduction,
};
use crate::storage::{MemoryTripleStore, TripleStore};
use crate::types::{EdgeId, NodeId, NodeVersion, Result, StrataError};

/// Entry point for queries and mutations against one store.
#[derive(Clone)]
pub struct GraphClient {
    executor: Executor,
    mutator: Mutator,
}

impl GraphClient {
    /// Creates a client over `store`.
    pub fn new(store: Arc<dyn TripleStore>, config: EngineConfig) -> Self {
        Self {
            executor: Executor::new(Arc::clone(&store), config.clone()),
            mutator: Mutator::new(store, config),
        }
    }

    /// Client over a fresh in-memory store with the default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTripleStore::new()), EngineConfig::default())
    }

    /// Underlying executor.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Underlying mutator.
    pub fn mutator(&self) -> &Mutator {
        &self.mutator
    }

    /// Commits a put request.
    pub fn put(&self, request: PutRequest) -> Result<PutResult> {
        self.mutator.put(request)
    }

    /// Commits a put request with explicit options.
    pub fn put_with(&self, request: PutRequest, opts: &PutOptions) -> Result<PutResult> {
        self.mutator.put_with(request, opts)
    }

    /// Every live node of a type.
    pub fn nodes(&self, type_name: impl Into<String>) -> NodeConnectionQuery<'_> {
        NodeConnectionQuery {
            draft: Draft::start(self, QueryNode::node_connection(type_name)),
        }
    }

    /// Node by id; executing fails with not-found when it is missing.
    pub fn node(&self, id: NodeId) -> NodeQuery<'_> {
        NodeQuery {
            draft: Draft::start(self, QueryNode::node_by_id(id)),
        }
    }

    /// Node by id, or nothing.
    pub fn node_or_default(&self, id: NodeId) -> NodeQuery<'_> {
        NodeQuery {
            draft: Draft::start(self, QueryNode::node_or_default_by_id(id)),
        }
    }

    /// Fresh copy of a node the caller already holds.
    pub fn node_by_node(&self, node: Node) -> NodeQuery<'_> {
        NodeQuery {
            draft: Draft::start(self, QueryNode::node_by_node(node)),
        }
    }

    /// Node by id, failing with a concurrency error unless it is at `version`.
    pub fn node_version(&self, id: NodeId, version: NodeVersion) -> NodeQuery<'_> {
        NodeQuery {
            draft: Draft::start(self, QueryNode::node_version_by_id(id, version)),
        }
    }

    /// Edge by id; executing fails with not-found when it is missing.
    pub fn edge(&self, id: EdgeId) -> EdgeQuery<'_> {
        EdgeQuery {
            draft: Draft::start(self, QueryNode::edge_by_id(id)),
        }
    }

    /// Edge by id, or nothing.
    pub fn edge_or_default(&self, id: EdgeId) -> EdgeQuery<'_> {
        EdgeQuery {
            draft: Draft::start(self, QueryNode::edge_or_default_by_id(id)),
        }
    }

    /// Round-robin interleave of node connections.
    pub fn zip<'a>(
        &'a self,
        parts: impl IntoIterator<Item = NodeConnectionQuery<'a>>,
    ) -> NodeConnectionQuery<'a> {
        let mut error = None;
        let mut branches = Vec::new();
        for (idx, part) in parts.into_iter().enumerate() {
            match part.draft.error {
                Some(err) => {
                    error.get_or_insert(err);
                }
                None => branches.push(part.draft.tree.rekeyed(&format!("{idx}."))),
            }
        }
        let zip_key = branches.iter().map(QueryTree::len).sum::<usize>().to_string();
        let mut draft = Draft {
            client: self,
            tree: QueryTree::single(zip_key.clone(), QueryNode::zip_node_connection()),
            head: zip_key.clone(),
            consistent: None,
            error,
        };
        for branch in &branches {
            if draft.error.is_some() {
                break;
            }
            match draft.tree.add_sub_tree(&zip_key, branch) {
                Ok(tree) => draft.tree = tree,
                Err(err) => draft.error = Some(err),
            }
        }
        if branches.is_empty() && draft.error.is_none() {
            draft.error = Some(StrataError::Contract("zip needs at least one connection".into()));
        }
        NodeConnectionQuery { draft }
    }
}

/// Tree under construction plus the first error any step hit.
struct Draft<'a> {
    client: &'a GraphClient,
    tree: QueryTree,
    head: String,
    consistent: Option<bool>,
    error: Option<StrataError>,
}

impl<'a> Draft<'a> {
    fn start(client: &'a GraphClient, node: QueryNode) -> Self {
        Self {
            client,
            tree: QueryTree::single("0", node),
            head: "0".to_owned(),
            consistent: None,
            error: None,
        }
    }

    /// Adds `node` as the new root, consuming the current head.
    fn push(mut self, node: QueryNode) -> Self {
        if self.error.is_some() {
            return self;
        }
        let key = self.tree.len().to_string();
        let grown = self
            .tree
            .add_node(key.clone(), node)
            .and_then(|tree| tree.add_edge(&key, &self.head));
        match grown {
            Ok(tree) => {
                self.tree = tree;
                self.head = key;
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Rewrites the head node.
    fn update(mut self, f: impl FnOnce(&QueryNode) -> Result<QueryNode>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.tree.update_node(&self.head, f) {
            Ok(tree) => self.tree = tree,
            Err(err) => self.error = Some(err),
        }
        self
    }

    fn finish(self) -> Result<QueryTree> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(match self.consistent {
            Some(flag) => self.tree.map_nodes(|node| node.with_consistent_read(flag)),
            None => self.tree,
        })
    }

    fn execute(self, opts: &ExecuteOptions) -> Result<ExecutionResult> {
        let client = self.client;
        let tree = self.finish()?;
        client.executor.execute_with(&tree, opts)
    }
}

/// Builder whose root is a node connection.
pub struct NodeConnectionQuery<'a> {
    draft: Draft<'a>,
}

/// Builder whose root yields at most one node.
pub struct NodeQuery<'a> {
    draft: Draft<'a>,
}

/// Builder whose root is an edge connection.
pub struct EdgeConnectionQuery<'a> {
    draft: Draft<'a>,
}

/// Builder whose root yields at most one edge.
pub struct EdgeQuery<'a> {
    draft: Draft<'a>,
}

fn hop<'a>(draft: Draft<'a>, node: QueryNode) -> EdgeConnectionQuery<'a> {
    EdgeConnectionQuery {
        draft: draft.push(node),
    }
}

impl<'a> NodeConnectionQuery<'a> {
    /// Narrows the scan with a property filter.
    pub fn filter(self, filter: Filter) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_filter(filter)),
        }
    }

    /// Sets the scan order.
    pub fn order(self, order: Order) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_order(order)),
        }
    }

    /// Page size used when no page arguments name one.
    pub fn page_size(self, size: usize) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_connection_size(size)),
        }
    }

    /// Rows requested per storage round.
    pub fn pre_filtered_size(self, size: usize) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_pre_filtered_connection_size(size)),
        }
    }

    /// Resumes after a cursor from a previous page.
    pub fn after(self, cursor: impl Into<String>) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_cursor(cursor)),
        }
    }

    /// Full page arguments.
    pub fn page(self, page: ConnectionArguments) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_connection_arguments(page)),
        }
    }

    /// Labels the root connection.
    pub fn tag(self, tag: impl Into<String>) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_tag(tag)),
        }
    }

    /// Forces strongly consistent reads for the whole query.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.draft.consistent = Some(consistent);
        self
    }

    /// Keeps nodes accepted by `test`.
    pub fn where_node(
        self,
        label: impl Into<String>,
        test: impl Fn(&Node) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            draft: self
                .draft
                .push(QueryNode::where_node(Predicate::new(label, test))),
        }
    }

    /// Typed edges whose `in` endpoint is each node.
    pub fn in_edges(self, edge_type: impl Into<String>) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::to_edge_connection(EdgeSide::In, edge_type, None))
    }

    /// Typed edges whose `out` endpoint is each node.
    pub fn out_edges(self, edge_type: impl Into<String>) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::to_edge_connection(EdgeSide::Out, edge_type, None))
    }

    /// Typed edges on `side` whose opposite endpoint has type `endpoint_type`.
    pub fn edges_to(
        self,
        side: EdgeSide,
        edge_type: impl Into<String>,
        endpoint_type: impl Into<String>,
    ) -> EdgeConnectionQuery<'a> {
        let node = QueryNode::to_edge_connection(side, edge_type, Some(endpoint_type.into()));
        hop(self.draft, node)
    }

    /// Every edge whose `in` endpoint is each node.
    pub fn all_in_edges(self) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::in_to_all_edge_connection())
    }

    /// Every edge whose `out` endpoint is each node.
    pub fn all_out_edges(self) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::out_to_all_edge_connection())
    }

    /// Typed edges touching each node on either side.
    pub fn edges(self, edge_type: impl Into<String>) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::in_and_out_to_edge_connection(edge_type))
    }

    /// First node; not-found when empty.
    pub fn first(self) -> NodeQuery<'a> {
        self.reduce(Reduction::First)
    }

    /// First node, or nothing.
    pub fn first_or_default(self) -> NodeQuery<'a> {
        self.reduce(Reduction::FirstOrDefault)
    }

    /// The only node; not-found when empty, a contract violation when ambiguous.
    pub fn single(self) -> NodeQuery<'a> {
        self.reduce(Reduction::Single)
    }

    /// The only node or nothing; a contract violation when ambiguous.
    pub fn single_or_default(self) -> NodeQuery<'a> {
        self.reduce(Reduction::SingleOrDefault)
    }

    fn reduce(self, mode: Reduction) -> NodeQuery<'a> {
        NodeQuery {
            draft: self.draft.push(QueryNode::reduce_node(mode)),
        }
    }

    /// Built tree.
    pub fn tree(self) -> Result<QueryTree> {
        self.draft.finish()
    }

    /// Executes and returns every node result.
    pub fn execute(self) -> Result<ExecutionResult> {
        self.draft.execute(&ExecuteOptions::default())
    }

    /// Executes with explicit options, such as a cancellation flag.
    pub fn execute_with(self, opts: &ExecuteOptions) -> Result<ExecutionResult> {
        self.draft.execute(opts)
    }

    /// Executes and returns the page.
    pub fn get(self) -> Result<Connection<Node>> {
        self.execute()?.output.into_nodes()
    }

    /// Executes and returns the nodes of the page.
    pub fn get_entities(self) -> Result<Vec<Node>> {
        Ok(self.get()?.into_nodes())
    }

    /// Returns `true` when the connection yields at least one node.
    pub fn any(self) -> Result<bool> {
        Ok(self.first_or_default().get()?.is_some())
    }
}

impl<'a> NodeQuery<'a> {
    /// Forces strongly consistent reads for the whole query.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.draft.consistent = Some(consistent);
        self
    }

    /// Typed edges whose `in` endpoint is the node.
    pub fn in_edges(self, edge_type: impl Into<String>) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::to_edge_connection(EdgeSide::In, edge_type, None))
    }

    /// Typed edges whose `out` endpoint is the node.
    pub fn out_edges(self, edge_type: impl Into<String>) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::to_edge_connection(EdgeSide::Out, edge_type, None))
    }

    /// Typed edges on `side` whose opposite endpoint has type `endpoint_type`.
    pub fn edges_to(
        self,
        side: EdgeSide,
        edge_type: impl Into<String>,
        endpoint_type: impl Into<String>,
    ) -> EdgeConnectionQuery<'a> {
        let node = QueryNode::to_edge_connection(side, edge_type, Some(endpoint_type.into()));
        hop(self.draft, node)
    }

    /// Every edge whose `in` endpoint is the node.
    pub fn all_in_edges(self) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::in_to_all_edge_connection())
    }

    /// Every edge whose `out` endpoint is the node.
    pub fn all_out_edges(self) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::out_to_all_edge_connection())
    }

    /// Typed edges touching the node on either side.
    pub fn edges(self, edge_type: impl Into<String>) -> EdgeConnectionQuery<'a> {
        hop(self.draft, QueryNode::in_and_out_to_edge_connection(edge_type))
    }

    /// Built tree.
    pub fn tree(self) -> Result<QueryTree> {
        self.draft.finish()
    }

    /// Executes and returns every node result.
    pub fn execute(self) -> Result<ExecutionResult> {
        self.draft.execute(&ExecuteOptions::default())
    }

    /// Executes with explicit options, such as a cancellation flag.
    pub fn execute_with(self, opts: &ExecuteOptions) -> Result<ExecutionResult> {
        self.draft.execute(opts)
    }

    /// Executes and returns the node.
    pub fn get(self) -> Result<Option<Node>> {
        self.execute()?.output.into_node()
    }

    /// Executes and returns zero or one node.
    pub fn get_entities(self) -> Result<Vec<Node>> {
        Ok(self.get()?.into_iter().collect())
    }

    /// Returns `true` when the query resolves to a node.
    pub fn any(self) -> Result<bool> {
        Ok(self.get()?.is_some())
    }
}

impl<'a> EdgeConnectionQuery<'a> {
    /// Narrows each round with a property filter.
    pub fn filter(self, filter: Filter) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_filter(filter)),
        }
    }

    /// Sets the scan direction.
    pub fn order(self, order: Order) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_order(order)),
        }
    }

    /// Page size used when no page arguments name one.
    pub fn page_size(self, size: usize) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_connection_size(size)),
        }
    }

    /// Rows requested per storage round.
    pub fn pre_filtered_size(self, size: usize) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_pre_filtered_connection_size(size)),
        }
    }

    /// Resumes after a cursor from a previous page.
    pub fn after(self, cursor: impl Into<String>) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_cursor(cursor)),
        }
    }

    /// Full page arguments.
    pub fn page(self, page: ConnectionArguments) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_connection_arguments(page)),
        }
    }

    /// Labels the root connection.
    pub fn tag(self, tag: impl Into<String>) -> Self {
        Self {
            draft: self.draft.update(|n| n.with_tag(tag)),
        }
    }

    /// Forces strongly consistent reads for the whole query.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.draft.consistent = Some(consistent);
        self
    }

    /// Keeps edges accepted by `test`.
    pub fn where_edge(
        self,
        label: impl Into<String>,
        test: impl Fn(&Edge) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            draft: self
                .draft
                .push(QueryNode::where_edge(Predicate::new(label, test))),
        }
    }

    /// `in` endpoints of the edges.
    pub fn in_nodes(self) -> NodeConnectionQuery<'a> {
        NodeConnectionQuery {
            draft: self.draft.push(QueryNode::from_edge_connection(EdgeSide::In)),
        }
    }

    /// `out` endpoints of the edges.
    pub fn out_nodes(self) -> NodeConnectionQuery<'a> {
        NodeConnectionQuery {
            draft: self.draft.push(QueryNode::from_edge_connection(EdgeSide::Out)),
        }
    }

    /// First edge; not-found when empty.
    pub fn first(self) -> EdgeQuery<'a> {
        self.reduce(Reduction::First)
    }

    /// First edge, or nothing.
    pub fn first_or_default(self) -> EdgeQuery<'a> {
        self.reduce(Reduction::FirstOrDefault)
    }

    /// The only edge; not-found when empty, a contract violation when ambiguous.
    pub fn single(self) -> EdgeQuery<'a> {
        self.reduce(Reduction::Single)
    }

    /// The only edge or nothing; a contract violation when ambiguous.
    pub fn single_or_default(self) -> EdgeQuery<'a> {
        self.reduce(Reduction::SingleOrDefault)
    }

    fn reduce(self, mode: Reduction) -> EdgeQuery<'a> {
        EdgeQuery {
            draft: self.draft.push(QueryNode::reduce_edge(mode)),
        }
    }

    /// Built tree.
    pub fn tree(self) -> Result<QueryTree> {
        self.draft.finish()
    }

    /// Executes and returns every node result.
    pub fn execute(self) -> Result<ExecutionResult> {
        self.draft.execute(&ExecuteOptions::default())
    }

    /// Executes with explicit options, such as a cancellation flag.
    pub fn execute_with(self, opts: &ExecuteOptions) -> Result<ExecutionResult> {
        self.draft.execute(opts)
    }

    /// Executes and returns the page.
    pub fn get(self) -> Result<Connection<Edge>> {
        self.execute()?.output.into_edges()
    }

    /// Executes and returns the edges of the page.
    pub fn get_entities(self) -> Result<Vec<Edge>> {
        Ok(self.get()?.into_nodes())
    }

    /// Returns `true` when the connection yields at least one edge.
    pub fn any(self) -> Result<bool> {
        Ok(self.first_or_default().get()?.is_some())
    }
}

impl<'a> EdgeQuery<'a> {
    /// Forces strongly consistent reads for the whole query.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.draft.consistent = Some(consistent);
        self
    }

    /// `in` endpoint of the edge.
    pub fn in_nodes(self) -> NodeConnectionQuery<'a> {
        NodeConnectionQuery {
            draft: self.draft.push(QueryNode::from_edge_connection(EdgeSide::In)),
        }
    }

    /// `out` endpoint of the edge.
    pub fn out_nodes(self) -> NodeConnectionQuery<'a> {
        NodeConnectionQuery {
            draft: self.draft.push(QueryNode::from_edge_connection(EdgeSide::Out)),
        }
    }

    /// Built tree.
    pub fn tree(self) -> Result<QueryTree> {
        self.draft.finish()
    }

    /// Executes and returns every node result.
    pub fn execute(self) -> Result<ExecutionResult> {
        self.draft.execute(&ExecuteOptions::default())
    }

    /// Executes with explicit options, such as a cancellation flag.
    pub fn execute_with(self, opts: &ExecuteOptions) -> Result<ExecutionResult> {
        self.draft.execute(opts)
    }

    /// Executes and returns the edge.
    pub fn get(self) -> Result<Option<Edge>> {
        self.execute()?.output.into_edge()
    }

    /// Executes and returns zero or one edge.
    pub fn get_entities(self) -> Result<Vec<Edge>> {
        Ok(self.get()?.into_iter().collect())
    }

    /// Returns `true` when the query resolves to an edge.
    pub fn any(self) -> Result<bool> {
        Ok(self.get()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> NodeId {
        NodeId::parse(raw).unwrap()
    }

    #[test]
    fn chained_builders_assign_stable_keys() {
        let client = GraphClient::in_memory();
        let tree = client
            .node(id("User:1"))
            .out_edges("Follows")
            .in_nodes()
            .first()
            .tree()
            .unwrap();
        assert_eq!(tree.root_key().unwrap(), "3");
        assert_eq!(tree.children("3"), ["2".to_owned()]);
        assert_eq!(tree.children("1"), ["0".to_owned()]);
    }

    #[test]
    fn zip_grafts_prefixed_branches() {
        let client = GraphClient::in_memory();
        let tree = client
            .zip([client.nodes("A"), client.nodes("B").filter(Filter::eq("x", 1))])
            .page_size(3)
            .tree()
            .unwrap();
        assert_eq!(tree.root_key().unwrap(), "2");
        assert_eq!(tree.children("2"), ["0.0".to_owned(), "1.0".to_owned()]);
        assert_eq!(tree.node("2").unwrap().connection_size(), Some(3));
    }

    #[test]
    fn setter_errors_surface_at_the_terminal() {
        let client = GraphClient::in_memory();
        let err = client
            .node(id("User:1"))
            .out_edges("Follows")
            .order(Order::by_prop("since"))
            .page_size(2)
            .tree()
            .unwrap_err();
        assert_eq!(err.code(), "UnsupportedCapability");
    }

    #[test]
    fn consistent_flag_reaches_every_node() {
        let client = GraphClient::in_memory();
        let tree = client
            .node(id("User:1"))
            .out_edges("Follows")
            .out_nodes()
            .consistent(true)
            .tree()
            .unwrap();
        assert!(tree.iter().all(|(_, node)| node.consistent_read()));
    }
}
