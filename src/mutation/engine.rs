use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};

use super::{EdgeByPropCheck, PutEntity, PutRequest};
use crate::config::EngineConfig;
use crate::model::{now_millis, Edge, Node};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::Filter;
use crate::storage::triple::{
    decode_edge, decode_node, edge_prefix, edge_primary_keys, edge_triples, node_record_key,
    node_triples, NODE_RECORD,
};
use crate::storage::{
    Condition, PrimaryKey, PutOutcome, TripleQuery, TripleStore, WriteItem, WriteSet,
};
use crate::types::{EdgeId, NodeId, NodeVersion, Result, StrataError};

/// Per-call mutation options.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    /// Checked before every planning read and before the commit.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl PutOptions {
    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(StrataError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Outcome of a committed put.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PutResult {
    /// Id the mutation was logged under.
    pub mutation_id: String,
    /// Nodes written by the request, carrying their new versions.
    pub nodes: Vec<Node>,
    /// Edge endpoints whose versions were bumped by edge writes.
    pub touched: Vec<Node>,
    /// Edges written.
    pub edges: Vec<Edge>,
    /// Edges removed.
    pub removed_edges: Vec<EdgeId>,
}

impl PutResult {
    /// Written or touched node with the given id.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes
            .iter()
            .chain(self.touched.iter())
            .find(|n| &n.id == id)
    }
}

/// Why a conditional item was added; decides the error when it is rejected.
#[derive(Clone, Debug, PartialEq)]
enum Purpose {
    Create(NodeId),
    Update(NodeId),
    Touch(NodeId),
    RemoveEdge(EdgeId),
    AllEdges(NodeId),
    EdgeByProp(NodeId),
}

impl Purpose {
    fn into_error(self, reason: &str) -> StrataError {
        match self {
            Purpose::Create(id) => StrataError::Contract(format!("node {id} already exists")),
            Purpose::Update(id) => {
                StrataError::concurrency(id, format!("node changed since it was read ({reason})"))
            }
            Purpose::Touch(id) => StrataError::concurrency(
                id,
                format!("edge endpoint changed concurrently ({reason})"),
            ),
            Purpose::RemoveEdge(id) => StrataError::not_found(format!("edge {id}")),
            Purpose::AllEdges(id) => {
                StrataError::concurrency(id, format!("edge set changed since it was read ({reason})"))
            }
            Purpose::EdgeByProp(id) => StrataError::concurrency(
                id,
                format!("edges changed after the property check ({reason})"),
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingKind {
    Write,
    Touch,
}

/// Node record write, merged across every entity of the request that addresses it.
struct PendingNode {
    next: Node,
    stored: Option<Node>,
    kind: PendingKind,
}

impl PendingNode {
    fn condition(&self) -> (Condition, fn(NodeId) -> Purpose) {
        match (&self.stored, self.kind) {
            (None, _) => (Condition::NotExists, Purpose::Create),
            (Some(stored), PendingKind::Write) => {
                (Condition::VersionEquals(stored.version()), Purpose::Update)
            }
            (Some(stored), PendingKind::Touch) => {
                (Condition::VersionEquals(stored.version()), Purpose::Touch)
            }
        }
    }
}

#[derive(Default)]
struct Plan {
    nodes: BTreeMap<NodeId, PendingNode>,
    edge_items: Vec<(WriteItem, Option<Purpose>)>,
    checks: Vec<(WriteItem, Purpose)>,
    edges: Vec<Edge>,
    removed: Vec<EdgeId>,
}

impl Plan {
    fn stored_version(&self, id: &NodeId) -> Option<Option<NodeVersion>> {
        self.nodes
            .get(id)
            .map(|pending| pending.stored.as_ref().map(Node::version))
    }

    fn into_write_set(self, table: &str) -> Result<(WriteSet, Vec<Option<Purpose>>, PutResult)> {
        let mut writes = WriteSet::new(table);
        let mut purposes = Vec::new();
        let mut result = PutResult {
            edges: self.edges,
            removed_edges: self.removed,
            ..PutResult::default()
        };
        for (id, pending) in self.nodes {
            let (condition, purpose) = pending.condition();
            let triples = node_triples(&pending.next)?;
            let fresh: FxHashSet<PrimaryKey> = triples.iter().map(|t| t.primary_key()).collect();
            for (idx, triple) in triples.into_iter().enumerate() {
                if idx == 0 {
                    writes.push(WriteItem::put(triple).when(condition.clone()));
                    purposes.push(Some(purpose(id.clone())));
                } else {
                    writes.push(WriteItem::put(triple));
                    purposes.push(None);
                }
            }
            if let Some(stored) = &pending.stored {
                for stale in node_triples(stored)? {
                    let key = stale.primary_key();
                    if !fresh.contains(&key) {
                        writes.push(WriteItem::delete(key));
                        purposes.push(None);
                    }
                }
            }
            match pending.kind {
                PendingKind::Write => result.nodes.push(pending.next),
                PendingKind::Touch => result.touched.push(pending.next),
            }
        }
        for (item, purpose) in self.edge_items {
            writes.push(item);
            purposes.push(purpose);
        }
        for (item, purpose) in self.checks {
            writes.push(item);
            purposes.push(Some(purpose));
        }
        Ok((writes, purposes, result))
    }
}

/// Applies [`PutRequest`]s with optimistic versioning and edge-integrity checks.
#[derive(Clone)]
pub struct Mutator {
    store: Arc<dyn TripleStore>,
    config: EngineConfig,
}

impl Mutator {
    /// Creates a mutator.
    pub fn new(store: Arc<dyn TripleStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Plans and atomically commits a request.
    ///
    /// Checks that can be decided from the current state fail before anything
    /// is written; the rest become conditions of the single write set, and a
    /// rejected condition is reported as the error of the check behind it.
    pub fn put(&self, request: PutRequest) -> Result<PutResult> {
        self.put_with(request, &PutOptions::default())
    }

    /// Like [`Mutator::put`]; a cancelled request fails with nothing written.
    pub fn put_with(&self, request: PutRequest, opts: &PutOptions) -> Result<PutResult> {
        let mutation_id = request.mutation_id.clone().unwrap_or_else(new_mutation_id);
        debug!(
            mutation_id = %mutation_id,
            entities = request.put_entities.len(),
            all_edges_checks = request.all_edges_check_for_nodes.len(),
            edge_by_prop_checks = request.edge_by_prop_checks.len(),
            "mutation.put.start"
        );
        let now = now_millis();
        let exempt: FxHashSet<&NodeId> = request.no_edge_checks_for_node_ids.iter().collect();
        let touch_endpoints = !request.without_node_edge_checks;
        let mut plan = Plan::default();
        let mut touched_edges: Vec<EdgeId> = Vec::new();

        for entity in &request.put_entities {
            match entity {
                PutEntity::Node(node) => self.plan_node(&mut plan, node, now, opts)?,
                PutEntity::Edge(edge) => {
                    for triple in edge_triples(edge)? {
                        plan.edge_items.push((WriteItem::put(triple), None));
                    }
                    plan.edges.push(edge.clone());
                    touched_edges.push(edge.id());
                }
                PutEntity::RemoveEdge(id) => {
                    for (idx, key) in edge_primary_keys(id).into_iter().enumerate() {
                        if idx == 0 {
                            let item = WriteItem::delete(key).when(Condition::Exists);
                            plan.edge_items.push((item, Some(Purpose::RemoveEdge(id.clone()))));
                        } else {
                            plan.edge_items.push((WriteItem::delete(key), None));
                        }
                    }
                    plan.removed.push(id.clone());
                    touched_edges.push(id.clone());
                }
            }
        }
        // node writes are all planned by now; an edge may name a node created later in the request
        if touch_endpoints {
            for edge in &touched_edges {
                self.touch_endpoints(&mut plan, edge, &exempt, now, opts)?;
            }
        }
        for observed in &request.all_edges_check_for_nodes {
            self.plan_all_edges_check(&mut plan, observed, opts)?;
        }
        for check in &request.edge_by_prop_checks {
            self.plan_edge_by_prop_check(&mut plan, check, opts)?;
        }

        let (writes, purposes, mut result) = plan.into_write_set(&self.config.table)?;
        let items = writes.len();
        if let Err(err) = opts.check_cancelled() {
            debug!(mutation_id = %mutation_id, items, "mutation.put.cancelled");
            return Err(err);
        }
        let timer = profile_timer();
        let outcome = self.store.put(writes);
        record_profile_timer(QueryProfileKind::Commit, timer);
        match outcome? {
            PutOutcome::Committed => {
                debug!(mutation_id = %mutation_id, items, "mutation.put.committed");
                result.mutation_id = mutation_id;
                Ok(result)
            }
            PutOutcome::Rejected(rejection) => {
                let err = purposes
                    .get(rejection.index)
                    .cloned()
                    .flatten()
                    .map(|purpose| purpose.into_error(&rejection.reason))
                    .unwrap_or_else(|| {
                        StrataError::Storage(format!(
                            "write item {} was rejected: {}",
                            rejection.index, rejection.reason
                        ))
                    });
                warn!(
                    mutation_id = %mutation_id,
                    index = rejection.index,
                    code = err.code(),
                    reason = %rejection.reason,
                    "mutation.put.rejected"
                );
                Err(err)
            }
        }
    }

    fn read_node(&self, id: &NodeId, opts: &PutOptions) -> Result<Option<Node>> {
        opts.check_cancelled()?;
        let query = TripleQuery::new(self.config.table.as_str(), id.as_str(), NODE_RECORD)
            .limit(1)
            .consistent(true);
        let page = self.store.query_by_partition_and_indexed_object(&query)?;
        page.triples
            .iter()
            .find(|t| t.predicate == NODE_RECORD && t.subject == id.as_str())
            .map(decode_node)
            .transpose()
    }

    fn plan_node(&self, plan: &mut Plan, node: &Node, now: i64, opts: &PutOptions) -> Result<()> {
        if plan.nodes.contains_key(&node.id) {
            return Err(StrataError::Contract(format!(
                "node {} is written more than once in one mutation",
                node.id
            )));
        }
        let stored = self.read_node(&node.id, opts)?;
        let mut next = node.clone();
        if node.version() == 0 {
            if stored.is_some() {
                return Err(StrataError::Contract(format!("node {} already exists", node.id)));
            }
            next.created_at = now;
        } else {
            let current = stored
                .as_ref()
                .ok_or_else(|| StrataError::not_found(format!("node {}", node.id)))?;
            if current.version() != node.version() {
                return Err(StrataError::concurrency(
                    &node.id,
                    format!(
                        "update is based on version {} but version {} is stored",
                        node.version(),
                        current.version()
                    ),
                ));
            }
            next.created_at = current.created_at;
        }
        next.version_detail.node_version = node.version() + 1;
        next.updated_at = now;
        trace!(node = %node.id, version = next.version(), "mutation.put.node");
        plan.nodes.insert(
            node.id.clone(),
            PendingNode {
                next,
                stored,
                kind: PendingKind::Write,
            },
        );
        Ok(())
    }

    fn touch_endpoints(
        &self,
        plan: &mut Plan,
        edge: &EdgeId,
        exempt: &FxHashSet<&NodeId>,
        now: i64,
        opts: &PutOptions,
    ) -> Result<()> {
        for id in [&edge.in_id, &edge.out_id] {
            if exempt.contains(id) || plan.nodes.contains_key(id) {
                continue;
            }
            let stored = self.read_node(id, opts)?.ok_or_else(|| {
                StrataError::Contract(format!("edge {edge} references missing node {id}"))
            })?;
            let mut next = stored.clone();
            next.version_detail.node_version += 1;
            next.updated_at = now;
            trace!(node = %id, version = next.version(), "mutation.put.touch");
            plan.nodes.insert(
                id.clone(),
                PendingNode {
                    next,
                    stored: Some(stored),
                    kind: PendingKind::Touch,
                },
            );
        }
        Ok(())
    }

    fn current_version(
        &self,
        plan: &Plan,
        id: &NodeId,
        opts: &PutOptions,
    ) -> Result<Option<NodeVersion>> {
        match plan.stored_version(id) {
            Some(version) => Ok(version),
            None => Ok(self.read_node(id, opts)?.map(|n| n.version())),
        }
    }

    fn plan_all_edges_check(
        &self,
        plan: &mut Plan,
        observed: &Node,
        opts: &PutOptions,
    ) -> Result<()> {
        let id = &observed.id;
        match self.current_version(plan, id, opts)? {
            None => {
                return Err(StrataError::concurrency(id, "node no longer exists"));
            }
            Some(version) if version != observed.version() => {
                return Err(StrataError::concurrency(
                    id,
                    format!(
                        "edge set changed: observed version {}, stored version {version}",
                        observed.version()
                    ),
                ));
            }
            Some(_) => {}
        }
        if !plan.nodes.contains_key(id) {
            plan.checks.push((
                WriteItem::check(node_record_key(id), Condition::VersionEquals(observed.version())),
                Purpose::AllEdges(id.clone()),
            ));
        }
        Ok(())
    }

    fn plan_edge_by_prop_check(
        &self,
        plan: &mut Plan,
        check: &EdgeByPropCheck,
        opts: &PutOptions,
    ) -> Result<()> {
        let id = &check.node_id;
        let version = self
            .current_version(plan, id, opts)?
            .ok_or_else(|| StrataError::not_found(format!("node {id}")))?;
        let wanted = Filter::Eq(check.prop.clone(), check.value.clone());
        let prefix = edge_prefix(check.side, Some(check.edge_type.as_str()), None);
        let mut start = None;
        let mut found = false;
        loop {
            opts.check_cancelled()?;
            let query = TripleQuery::new(self.config.table.as_str(), id.as_str(), prefix.as_str())
                .start_after(start)
                .limit(self.config.max_pre_filtered_size)
                .consistent(true);
            let page = self.store.query_by_partition_and_indexed_object(&query)?;
            for triple in &page.triples {
                if wanted.matches(&decode_edge(triple)?.props) {
                    found = true;
                }
            }
            start = page.continuation;
            if found || start.is_none() {
                break;
            }
        }
        if found != check.exists {
            return Err(StrataError::concurrency(
                id,
                format!(
                    "expected {} {} edge with {} = {}",
                    if check.exists { "an" } else { "no" },
                    check.edge_type,
                    check.prop,
                    check.value
                ),
            ));
        }
        if !plan.nodes.contains_key(id) {
            plan.checks.push((
                WriteItem::check(node_record_key(id), Condition::VersionEquals(version)),
                Purpose::EdgeByProp(id.clone()),
            ));
        }
        Ok(())
    }
}

fn new_mutation_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
