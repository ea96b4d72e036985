use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use smallvec::{smallvec, SmallVec};
use tracing::{trace, warn};

use super::cursor::{Cursor, CursorPayload};
use super::filter::{EdgePredicate, Filter, NodePredicate};
use super::node::EntityKind;
use super::pagination::{Connection, ConnectionEdge};
use super::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use super::result::{
    EdgeConnectionResult, GraphResult, NodeConnectionResult, ResultMeta,
};
use crate::config::EngineConfig;
use crate::model::{EdgeSide, Edge, Entity, Node, Props};
use crate::storage::triple::{
    decode_edge, decode_node, edge_object, encode_scalar, id_prefix, node_record_index_key,
    prop_prefix, type_partition, ID_PREDICATE, NODE_RECORD,
};
use crate::storage::{Triple, TripleKey, TriplePage, TripleQuery, TripleStore};
use crate::types::{EdgeId, NodeId, Result, StrataError};

/// Per-execution state shared by every stream.
pub(crate) struct ExecContext<'a> {
    store: &'a dyn TripleStore,
    pub(crate) config: &'a EngineConfig,
    consistent_read: bool,
    cancel: Option<Arc<AtomicBool>>,
    nodes: LruCache<NodeId, Option<Node>>,
    pub(crate) results: BTreeMap<String, GraphResult>,
    pub(crate) storage_rounds: usize,
}

impl<'a> ExecContext<'a> {
    pub(crate) fn new(
        store: &'a dyn TripleStore,
        config: &'a EngineConfig,
        consistent_read: bool,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.resolve_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            config,
            consistent_read,
            cancel,
            nodes: LruCache::new(capacity),
            results: BTreeMap::new(),
            storage_rounds: 0,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(StrataError::Cancelled);
            }
        }
        Ok(())
    }

    /// One storage round over `partition`.
    pub(crate) fn query(
        &mut self,
        partition: &str,
        prefix: &str,
        start: Option<TripleKey>,
        forward: bool,
        limit: usize,
    ) -> Result<TriplePage> {
        self.check_cancelled()?;
        let query = TripleQuery::new(self.config.table.as_str(), partition, prefix)
            .start_after(start)
            .forward(forward)
            .limit(limit.max(1))
            .consistent(self.consistent_read);
        let timer = profile_timer();
        let page = self.store.query_by_partition_and_indexed_object(&query);
        record_profile_timer(QueryProfileKind::StorageRound, timer);
        self.storage_rounds += 1;
        page
    }

    /// Reads a node record, memoised for the rest of the execution.
    pub(crate) fn load_node(&mut self, id: &NodeId) -> Result<Option<Node>> {
        if let Some(hit) = self.nodes.get(id) {
            return Ok(hit.clone());
        }
        let page = self.query(id.as_str(), NODE_RECORD, None, true, 1)?;
        let node = page
            .triples
            .iter()
            .find(|t| t.predicate == NODE_RECORD && t.subject == id.as_str())
            .map(decode_node)
            .transpose()?;
        self.nodes.put(id.clone(), node.clone());
        Ok(node)
    }

    /// Reads an edge from its `in` partition.
    pub(crate) fn load_edge(&mut self, id: &EdgeId) -> Result<Option<Edge>> {
        let object = edge_object(EdgeSide::In, id);
        let page = self.query(id.in_id.as_str(), &object, None, true, 1)?;
        page.triples
            .iter()
            .find(|t| t.object == object)
            .map(decode_edge)
            .transpose()
    }
}

fn passes(filter: Option<&Filter>, props: &Props) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let timer = profile_timer();
    let keep = filter.matches(props);
    record_profile_timer(QueryProfileKind::Filter, timer);
    keep
}

fn unexpected_payload(key: &str, payload: &CursorPayload) -> StrataError {
    StrataError::Contract(format!(
        "cursor does not match query: {key} cannot resume from {payload:?}"
    ))
}

/// Entity emitted by a stream with the cursor positioned at it.
pub(crate) struct Candidate {
    pub(crate) entity: Entity,
    pub(crate) cursor: Cursor,
}

/// Pull-based producer of candidates for one query node.
pub(crate) trait CandidateStream {
    /// Next candidate, or `None` once exhausted.
    fn try_next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>>;

    /// Records this node's result, then its inputs'.
    fn finish(self: Box<Self>, ctx: &mut ExecContext<'_>) -> Result<()>;
}

pub(crate) type BoxCandidateStream = Box<dyn CandidateStream>;

#[derive(Default)]
struct StreamStats {
    emitted: Vec<(Cursor, Entity)>,
    rounds: usize,
    partitions: usize,
    discarded: usize,
    exhausted: bool,
    resumed: bool,
}

impl StreamStats {
    fn emit(&mut self, entity: Entity, cursor: Cursor) -> Candidate {
        self.emitted.push((cursor.clone(), entity.clone()));
        Candidate { entity, cursor }
    }

    fn done(&mut self) -> Option<Candidate> {
        self.exhausted = true;
        None
    }

    fn report(
        self,
        key: &str,
        kind: EntityKind,
        tag: Option<String>,
        needs_more_data: bool,
        ctx: &mut ExecContext<'_>,
    ) -> Result<()> {
        let mut meta = ResultMeta {
            needs_more_data,
            has_more_data: !self.exhausted,
            item_count: self.emitted.len(),
            storage_rounds: self.rounds,
            tag,
            ..ResultMeta::default()
        };
        if let Some((last, _)) = self.emitted.last() {
            meta.cursor = Some(last.encode()?);
            if let [(child, _)] = last.child_nodes(last.root_key()).as_slice() {
                meta.child_cursor = last.sub_cursor(child).map(|c| c.encode()).transpose()?;
            }
        }
        let mut edges = Vec::with_capacity(self.emitted.len());
        for (cursor, entity) in self.emitted {
            edges.push(ConnectionEdge {
                cursor: cursor.encode()?,
                node: entity,
            });
        }
        let connection = Connection::new(edges, !self.exhausted, self.resumed)?;
        let result = match kind {
            EntityKind::Node => GraphResult::NodeConnection(NodeConnectionResult {
                connection: connection.try_map(|e| expect_node(key, e))?,
                meta,
            }),
            EntityKind::Edge => GraphResult::EdgeConnection(EdgeConnectionResult {
                connection: connection.try_map(|e| expect_edge(key, e))?,
                meta,
            }),
        };
        ctx.results.insert(key.to_owned(), result);
        Ok(())
    }
}

pub(crate) fn expect_node(key: &str, entity: Entity) -> Result<Node> {
    entity
        .into_node()
        .ok_or_else(|| StrataError::Contract(format!("{key} yielded an edge where a node was expected")))
}

pub(crate) fn expect_edge(key: &str, entity: Entity) -> Result<Edge> {
    entity
        .into_edge()
        .ok_or_else(|| StrataError::Contract(format!("{key} yielded a node where an edge was expected")))
}

/// Paged scan over one partition, walking its object-prefix phases in order.
struct PartitionScan {
    partition: String,
    phases: SmallVec<[String; 2]>,
    phase: usize,
    start: Option<TripleKey>,
    forward: bool,
    batch: usize,
    buffer: VecDeque<Triple>,
    rounds: usize,
}

impl PartitionScan {
    fn new(partition: String, phases: SmallVec<[String; 2]>, forward: bool, batch: usize) -> Self {
        Self {
            partition,
            phases,
            phase: 0,
            start: None,
            forward,
            batch,
            buffer: VecDeque::new(),
            rounds: 0,
        }
    }

    fn resume_after(&mut self, key: TripleKey) -> Result<()> {
        if key.partition != self.partition {
            return Err(StrataError::Contract(format!(
                "cursor does not match query: position in {} cannot resume a scan of {}",
                key.partition, self.partition
            )));
        }
        self.phase = self
            .phases
            .iter()
            .position(|prefix| key.object.starts_with(prefix.as_str()))
            .ok_or_else(|| {
                StrataError::Contract(format!(
                    "cursor does not match query: {} is outside the scanned range",
                    key.object
                ))
            })?;
        self.start = Some(key);
        Ok(())
    }

    fn next_triple(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Triple>> {
        loop {
            if let Some(triple) = self.buffer.pop_front() {
                return Ok(Some(triple));
            }
            let Some(prefix) = self.phases.get(self.phase) else {
                return Ok(None);
            };
            let page = ctx.query(&self.partition, prefix, self.start.take(), self.forward, self.batch)?;
            self.rounds += 1;
            trace!(
                partition = %self.partition,
                rows = page.triples.len(),
                round = self.rounds,
                "query.scan.round"
            );
            self.buffer.extend(page.triples);
            match page.continuation {
                Some(next) => self.start = Some(next),
                None => self.phase += 1,
            }
        }
    }
}

/// Scan settings of a type-index scan.
pub(crate) struct ScanPlan {
    pub(crate) type_name: String,
    /// Indexed property to order by; `None` orders by id.
    pub(crate) order_prop: Option<String>,
    pub(crate) forward: bool,
    pub(crate) batch: usize,
    pub(crate) filter: Option<Filter>,
    pub(crate) tag: Option<String>,
}

/// Type-index scan yielding nodes.
///
/// Ordered by a property, the scan walks the `prop|name|` index and then the
/// id index for nodes without a scalar value, so those sort after every
/// value (before them when descending).
pub(crate) struct NodeScanStream {
    key: String,
    scan: PartitionScan,
    order_prop: Option<String>,
    filter: Option<Filter>,
    tag: Option<String>,
    stats: StreamStats,
}

impl NodeScanStream {
    pub(crate) fn new(key: &str, plan: ScanPlan, resume: Option<&CursorPayload>) -> Result<Self> {
        let mut phases: SmallVec<[String; 2]> = match plan.order_prop.as_deref() {
            Some(prop) => smallvec![prop_prefix(prop), id_prefix()],
            None => smallvec![id_prefix()],
        };
        if !plan.forward {
            phases.reverse();
        }
        let mut scan = PartitionScan::new(
            type_partition(&plan.type_name),
            phases,
            plan.forward,
            plan.batch,
        );
        let mut stats = StreamStats::default();
        match resume {
            Some(CursorPayload::HasProp { key: position }) => {
                scan.resume_after(position.clone())?;
                stats.resumed = true;
            }
            Some(CursorPayload::Empty) | None => {}
            Some(other) => return Err(unexpected_payload(key, other)),
        }
        Ok(Self {
            key: key.to_owned(),
            scan,
            order_prop: plan.order_prop,
            filter: plan.filter,
            tag: plan.tag,
            stats,
        })
    }
}

impl NodeScanStream {
    /// An id-index row of a node that the property phase already covers.
    fn indexed_elsewhere(&self, triple: &Triple, node: &Node) -> bool {
        let Some(prop) = self.order_prop.as_deref() else {
            return false;
        };
        triple.predicate == ID_PREDICATE
            && node.props.get(prop).and_then(encode_scalar).is_some()
    }
}

impl CandidateStream for NodeScanStream {
    fn try_next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>> {
        loop {
            let Some(triple) = self.scan.next_triple(ctx)? else {
                return Ok(self.stats.done());
            };
            let node = decode_node(&triple)?;
            if self.indexed_elsewhere(&triple, &node) {
                continue;
            }
            if node.is_deleted() || !passes(self.filter.as_ref(), &node.props) {
                self.stats.discarded += 1;
                continue;
            }
            let cursor = Cursor::leaf(self.key.as_str(), CursorPayload::HasProp { key: triple.key() });
            return Ok(Some(self.stats.emit(Entity::Node(node), cursor)));
        }
    }

    fn finish(self: Box<Self>, ctx: &mut ExecContext<'_>) -> Result<()> {
        let mut stats = self.stats;
        stats.rounds = self.scan.rounds;
        let needs_more_data = stats.rounds > self.scan.phases.len();
        stats.report(&self.key, EntityKind::Node, self.tag, needs_more_data, ctx)
    }
}

/// Input of a hop or resolution: a single looked-up entity or a child stream.
pub(crate) enum SourceInput {
    Single {
        entity: Option<Entity>,
        cursor: Cursor,
        consumed: bool,
    },
    Stream(BoxCandidateStream),
}

impl SourceInput {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>> {
        match self {
            SourceInput::Single {
                entity,
                cursor,
                consumed,
            } => {
                if *consumed {
                    return Ok(None);
                }
                *consumed = true;
                Ok(entity.take().map(|entity| Candidate {
                    entity,
                    cursor: cursor.clone(),
                }))
            }
            SourceInput::Stream(stream) => stream.try_next(ctx),
        }
    }

    fn finish(self, ctx: &mut ExecContext<'_>) -> Result<()> {
        match self {
            SourceInput::Single { .. } => Ok(()),
            SourceInput::Stream(stream) => stream.finish(ctx),
        }
    }
}

/// Scan settings of a hop.
pub(crate) struct HopPlan {
    /// Object prefixes scanned per source partition, in order.
    pub(crate) phases: SmallVec<[String; 2]>,
    /// Self-loops found under this prefix were already emitted by an earlier phase.
    pub(crate) self_loop_prefix: Option<String>,
    pub(crate) forward: bool,
    pub(crate) batch: usize,
    pub(crate) filter: Option<Filter>,
    pub(crate) tag: Option<String>,
}

/// Node to edge hop: for each source node, scans its partition's edge triples.
pub(crate) struct HopStream {
    key: String,
    plan: HopPlan,
    source: SourceInput,
    current: Option<(PartitionScan, Cursor)>,
    stats: StreamStats,
}

impl HopStream {
    /// `resume` is the hop's last position and the source fragment it belonged to.
    pub(crate) fn new(
        key: &str,
        plan: HopPlan,
        mut source: SourceInput,
        resume: Option<(TripleKey, Cursor)>,
    ) -> Result<Self> {
        let mut stats = StreamStats::default();
        let mut current = None;
        if let Some((position, fragment)) = resume {
            let partition = position.partition.clone();
            if let SourceInput::Single {
                entity, consumed, ..
            } = &mut source
            {
                let matches_source = matches!(
                    entity.as_ref().and_then(Entity::as_node),
                    Some(node) if node.id.as_str() == partition
                );
                if !matches_source {
                    return Err(StrataError::Contract(format!(
                        "cursor does not match query: {key} was positioned on {partition}"
                    )));
                }
                *consumed = true;
            }
            let mut scan = PartitionScan::new(partition, plan.phases.clone(), plan.forward, plan.batch);
            scan.resume_after(position)?;
            current = Some((scan, fragment));
            stats.resumed = true;
            stats.partitions = 1;
        }
        Ok(Self {
            key: key.to_owned(),
            plan,
            source,
            current,
            stats,
        })
    }

    fn skips(&self, triple: &Triple, edge: &Edge) -> bool {
        let repeated_loop = edge.in_id == edge.out_id
            && self
                .plan
                .self_loop_prefix
                .as_deref()
                .is_some_and(|prefix| triple.object.starts_with(prefix));
        repeated_loop || !passes(self.plan.filter.as_ref(), &edge.props)
    }
}

impl CandidateStream for HopStream {
    fn try_next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>> {
        loop {
            if let Some((mut scan, source_cursor)) = self.current.take() {
                while let Some(triple) = scan.next_triple(ctx)? {
                    let edge = decode_edge(&triple)?;
                    if self.skips(&triple, &edge) {
                        self.stats.discarded += 1;
                        continue;
                    }
                    let cursor = Cursor::branch(
                        self.key.as_str(),
                        CursorPayload::HasProp { key: triple.key() },
                        [source_cursor.clone()],
                    );
                    self.current = Some((scan, source_cursor));
                    return Ok(Some(self.stats.emit(Entity::Edge(edge), cursor)));
                }
                self.stats.rounds += scan.rounds;
            }
            let Some(source) = self.source.next(ctx)? else {
                return Ok(self.stats.done());
            };
            let Entity::Node(node) = &source.entity else {
                return Err(StrataError::Contract(format!(
                    "{} hops from nodes but its input yielded an edge",
                    self.key
                )));
            };
            trace!(hop = %self.key, source = %node.id, "query.hop.partition");
            self.stats.partitions += 1;
            let scan = PartitionScan::new(
                node.id.to_string(),
                self.plan.phases.clone(),
                self.plan.forward,
                self.plan.batch,
            );
            self.current = Some((scan, source.cursor));
        }
    }

    fn finish(self: Box<Self>, ctx: &mut ExecContext<'_>) -> Result<()> {
        let HopStream {
            key,
            plan,
            source,
            current,
            mut stats,
        } = *self;
        if let Some((scan, _)) = current {
            stats.rounds += scan.rounds;
        }
        let needs_more_data = stats.rounds > stats.partitions;
        stats.report(&key, EntityKind::Edge, plan.tag, needs_more_data, ctx)?;
        source.finish(ctx)
    }
}

/// Edge to node step: loads the chosen endpoint of every input edge.
pub(crate) struct ResolveStream {
    key: String,
    side: EdgeSide,
    filter: Option<Filter>,
    tag: Option<String>,
    source: SourceInput,
    stats: StreamStats,
}

impl ResolveStream {
    pub(crate) fn new(
        key: &str,
        side: EdgeSide,
        filter: Option<Filter>,
        tag: Option<String>,
        mut source: SourceInput,
        resumed: bool,
    ) -> Self {
        if resumed {
            if let SourceInput::Single { consumed, .. } = &mut source {
                *consumed = true;
            }
        }
        let stats = StreamStats {
            resumed,
            ..StreamStats::default()
        };
        Self {
            key: key.to_owned(),
            side,
            filter,
            tag,
            source,
            stats,
        }
    }
}

impl CandidateStream for ResolveStream {
    fn try_next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>> {
        loop {
            let Some(source) = self.source.next(ctx)? else {
                return Ok(self.stats.done());
            };
            let Entity::Edge(edge) = &source.entity else {
                return Err(StrataError::Contract(format!(
                    "{} resolves edges but its input yielded a node",
                    self.key
                )));
            };
            let id = self.side.endpoint(edge).clone();
            let timer = profile_timer();
            let before = ctx.storage_rounds;
            let loaded = ctx.load_node(&id)?;
            self.stats.rounds += ctx.storage_rounds - before;
            record_profile_timer(QueryProfileKind::Resolve, timer);
            let node = match loaded {
                Some(node) if !node.is_deleted() => node,
                Some(_) => {
                    self.stats.discarded += 1;
                    continue;
                }
                None => {
                    warn!(edge = %edge.id(), node = %id, "query.resolve.missing_endpoint");
                    self.stats.discarded += 1;
                    continue;
                }
            };
            if !passes(self.filter.as_ref(), &node.props) {
                self.stats.discarded += 1;
                continue;
            }
            let cursor = Cursor::branch(
                self.key.as_str(),
                CursorPayload::HasProp {
                    key: node_record_index_key(&id),
                },
                [source.cursor],
            );
            return Ok(Some(self.stats.emit(Entity::Node(node), cursor)));
        }
    }

    fn finish(self: Box<Self>, ctx: &mut ExecContext<'_>) -> Result<()> {
        let needs_more_data = self.stats.discarded > 0;
        self.stats
            .report(&self.key, EntityKind::Node, self.tag, needs_more_data, ctx)?;
        self.source.finish(ctx)
    }
}

/// Round-robin interleave of node connections.
///
/// Turn `t` draws from child `t mod N`; a child that runs dry is skipped on
/// its later turns. The emitted cursor records the turn and every child's
/// latest fragment.
pub(crate) struct ZipStream {
    key: String,
    tag: Option<String>,
    children: Vec<BoxCandidateStream>,
    fragments: Vec<Cursor>,
    exhausted: Vec<bool>,
    turn: u64,
    stats: StreamStats,
}

impl ZipStream {
    pub(crate) fn new(
        key: &str,
        tag: Option<String>,
        children: Vec<BoxCandidateStream>,
        fragments: Vec<Cursor>,
        resume_turn: Option<u64>,
    ) -> Self {
        let stats = StreamStats {
            resumed: resume_turn.is_some(),
            ..StreamStats::default()
        };
        let exhausted = vec![false; children.len()];
        Self {
            key: key.to_owned(),
            tag,
            children,
            fragments,
            exhausted,
            turn: resume_turn.map(|t| t + 1).unwrap_or(0),
            stats,
        }
    }
}

impl CandidateStream for ZipStream {
    fn try_next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>> {
        let width = self.children.len();
        let mut misses = 0;
        while misses < width {
            let turn = self.turn;
            let idx = (turn % width as u64) as usize;
            self.turn += 1;
            if self.exhausted[idx] {
                misses += 1;
                continue;
            }
            match self.children[idx].try_next(ctx)? {
                Some(candidate) => {
                    self.fragments[idx] = candidate.cursor;
                    let cursor = Cursor::branch(
                        self.key.as_str(),
                        CursorPayload::Indexed { index: turn },
                        self.fragments.iter().cloned(),
                    );
                    return Ok(Some(self.stats.emit(candidate.entity, cursor)));
                }
                None => {
                    self.exhausted[idx] = true;
                    misses += 1;
                }
            }
        }
        Ok(self.stats.done())
    }

    fn finish(self: Box<Self>, ctx: &mut ExecContext<'_>) -> Result<()> {
        let ZipStream {
            key,
            tag,
            children,
            stats,
            ..
        } = *self;
        stats.report(&key, EntityKind::Node, tag, false, ctx)?;
        for child in children {
            child.finish(ctx)?;
        }
        Ok(())
    }
}

/// Predicate of a `Where` connection.
pub(crate) enum WherePredicate {
    Node(NodePredicate),
    Edge(EdgePredicate),
}

/// Client-side narrowing of a child connection.
pub(crate) struct WhereStream {
    key: String,
    predicate: WherePredicate,
    filter: Option<Filter>,
    tag: Option<String>,
    input: BoxCandidateStream,
    stats: StreamStats,
}

impl WhereStream {
    pub(crate) fn new(
        key: &str,
        predicate: WherePredicate,
        filter: Option<Filter>,
        tag: Option<String>,
        input: BoxCandidateStream,
        resumed: bool,
    ) -> Self {
        let stats = StreamStats {
            resumed,
            ..StreamStats::default()
        };
        Self {
            key: key.to_owned(),
            predicate,
            filter,
            tag,
            input,
            stats,
        }
    }

    fn kind(&self) -> EntityKind {
        match self.predicate {
            WherePredicate::Node(_) => EntityKind::Node,
            WherePredicate::Edge(_) => EntityKind::Edge,
        }
    }
}

impl CandidateStream for WhereStream {
    fn try_next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Candidate>> {
        loop {
            let Some(candidate) = self.input.try_next(ctx)? else {
                return Ok(self.stats.done());
            };
            let timer = profile_timer();
            let keep = match (&self.predicate, &candidate.entity) {
                (WherePredicate::Node(p), Entity::Node(node)) => p.test(node),
                (WherePredicate::Edge(p), Entity::Edge(edge)) => p.test(edge),
                _ => {
                    return Err(StrataError::Contract(format!(
                        "{} received an entity of the wrong kind",
                        self.key
                    )))
                }
            };
            record_profile_timer(QueryProfileKind::Filter, timer);
            if !keep || !passes(self.filter.as_ref(), candidate.entity.props()) {
                self.stats.discarded += 1;
                continue;
            }
            let cursor = Cursor::branch(self.key.as_str(), CursorPayload::Empty, [candidate.cursor]);
            return Ok(Some(self.stats.emit(candidate.entity, cursor)));
        }
    }

    fn finish(self: Box<Self>, ctx: &mut ExecContext<'_>) -> Result<()> {
        let kind = self.kind();
        let WhereStream {
            key,
            tag,
            input,
            stats,
            ..
        } = *self;
        let needs_more_data = stats.discarded > 0;
        stats.report(&key, kind, tag, needs_more_data, ctx)?;
        input.finish(ctx)
    }
}

/// Checks that a resumed stream carries a payload it understands.
pub(crate) fn expect_empty(key: &str, payload: Option<&CursorPayload>) -> Result<()> {
    match payload {
        None | Some(CursorPayload::Empty) => Ok(()),
        Some(other) => Err(unexpected_payload(key, other)),
    }
}

pub(crate) fn expect_position(key: &str, payload: Option<&CursorPayload>) -> Result<Option<TripleKey>> {
    match payload {
        None | Some(CursorPayload::Empty) => Ok(None),
        Some(CursorPayload::HasProp { key: position }) => Ok(Some(position.clone())),
        Some(other) => Err(unexpected_payload(key, other)),
    }
}

pub(crate) fn expect_turn(key: &str, payload: Option<&CursorPayload>) -> Result<Option<u64>> {
    match payload {
        None | Some(CursorPayload::Empty) => Ok(None),
        Some(CursorPayload::Indexed { index }) => Ok(Some(*index)),
        Some(other) => Err(unexpected_payload(key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryTripleStore, WriteItem, WriteSet};
    use crate::storage::triple::node_triples;

    fn store_with_users(count: usize) -> MemoryTripleStore {
        let store = MemoryTripleStore::new();
        let mut writes = WriteSet::new("triples");
        for i in 0..count {
            let node = Node::new(NodeId::new("User", &format!("{i:02}")).unwrap())
                .with_prop("even", i % 2 == 0);
            for triple in node_triples(&node).unwrap() {
                writes.push(WriteItem::put(triple));
            }
        }
        store.put(writes).unwrap();
        store
    }

    #[test]
    fn filtered_scan_refetches_until_satisfied() {
        let store = store_with_users(10);
        let config = EngineConfig::default();
        let mut ctx = ExecContext::new(&store, &config, false, None);
        let plan = ScanPlan {
            type_name: "User".into(),
            order_prop: None,
            forward: true,
            batch: 2,
            filter: Some(Filter::eq("even", true)),
            tag: None,
        };
        let mut stream = NodeScanStream::new("0", plan, None).unwrap();
        let mut ids = Vec::new();
        while let Some(c) = stream.try_next(&mut ctx).unwrap() {
            ids.push(c.entity.as_node().unwrap().id.key().to_owned());
        }
        assert_eq!(ids, vec!["00", "02", "04", "06", "08"]);
        Box::new(stream).finish(&mut ctx).unwrap();
        let meta = ctx.results["0"].meta().clone();
        assert!(meta.needs_more_data);
        assert!(!meta.has_more_data);
        assert_eq!(meta.item_count, 5);
    }

    #[test]
    fn cancellation_stops_storage_rounds() {
        let store = store_with_users(3);
        let config = EngineConfig::default();
        let flag = Arc::new(AtomicBool::new(true));
        let mut ctx = ExecContext::new(&store, &config, false, Some(flag));
        let err = ctx
            .load_node(&NodeId::parse("User:00").unwrap())
            .unwrap_err();
        assert!(matches!(err, StrataError::Cancelled));
    }

    #[test]
    fn node_lookups_are_cached_per_execution() {
        let store = store_with_users(1);
        let config = EngineConfig::default();
        let mut ctx = ExecContext::new(&store, &config, false, None);
        let id = NodeId::parse("User:00").unwrap();
        assert!(ctx.load_node(&id).unwrap().is_some());
        assert!(ctx.load_node(&id).unwrap().is_some());
        assert_eq!(ctx.storage_rounds, 1);
    }
}
