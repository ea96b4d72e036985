//! Bottom-up query execution.
//!
//! Identity lookups and reductions are evaluated eagerly while the stream
//! tree is built; connections become [`CandidateStream`]s that the root
//! pulls one item beyond the page size to learn whether more data exists.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::cursor::{Cursor, CursorPayload};
use super::node::{ConnectionSpec, EntityKind, QueryNode, Reduction, Shape};
use super::pagination::{Connection, ConnectionArguments, ConnectionEdge};
use super::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use super::result::{
    EdgeConnectionResult, EdgeResult, ExecutionResult, GraphResult, NodeConnectionResult,
    NodeResult, QueryOutput, ResultMeta,
};
use super::stream::{
    expect_edge, expect_empty, expect_node, expect_position, expect_turn, BoxCandidateStream,
    Candidate, ExecContext, HopPlan, HopStream, NodeScanStream, ResolveStream, ScanPlan,
    SourceInput, WherePredicate, WhereStream, ZipStream,
};
use super::tree::QueryTree;
use crate::config::EngineConfig;
use crate::model::{EdgeSide, Entity};
use crate::storage::triple::edge_prefix;
use crate::storage::TripleStore;
use crate::types::{Result, StrataError};

/// Per-call execution options.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    /// Forces strong consistency on or off; `None` uses the tree's flags and the config default.
    pub consistent_read: Option<bool>,
    /// Checked before every storage round.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Executes query trees against a [`TripleStore`].
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn TripleStore>,
    config: EngineConfig,
}

impl Executor {
    /// Creates an executor.
    pub fn new(store: Arc<dyn TripleStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes with default options.
    pub fn execute(&self, tree: &QueryTree) -> Result<ExecutionResult> {
        self.execute_with(tree, &ExecuteOptions::default())
    }

    /// Executes a complete tree.
    pub fn execute_with(&self, tree: &QueryTree, opts: &ExecuteOptions) -> Result<ExecutionResult> {
        let root_key = tree.root_key()?.to_owned();
        validate_tree(tree)?;
        let tree_consistent = resolve_consistency(tree)?;
        let consistent = opts
            .consistent_read
            .unwrap_or(tree_consistent || self.config.consistent_read);
        let mut ctx = ExecContext::new(self.store.as_ref(), &self.config, consistent, opts.cancel.clone());
        let root = tree.node(&root_key)?;
        debug!(root = %root_key, kind = root.kind(), nodes = tree.len(), consistent, "query.exec.start");
        let output = match root.shape() {
            Shape::Single => {
                let entity = self.evaluate_single(tree, &root_key, &mut ctx)?;
                match root.entity_kind() {
                    EntityKind::Node => {
                        QueryOutput::Node(entity.map(|e| expect_node(&root_key, e)).transpose()?)
                    }
                    EntityKind::Edge => {
                        QueryOutput::Edge(entity.map(|e| expect_edge(&root_key, e)).transpose()?)
                    }
                }
            }
            Shape::Connection => self.paginate(tree, &root_key, &mut ctx)?,
        };
        debug!(root = %root_key, storage_rounds = ctx.storage_rounds, "query.exec.done");
        Ok(ExecutionResult {
            root_key,
            output,
            results: ctx.results,
        })
    }

    fn paginate(&self, tree: &QueryTree, key: &str, ctx: &mut ExecContext<'_>) -> Result<QueryOutput> {
        let node = tree.node(key)?;
        let spec = connection_spec(node, key)?;
        spec.page.validate()?;
        let size = spec
            .page
            .count()
            .or(spec.connection_size)
            .unwrap_or(self.config.default_page_size);
        if size == 0 {
            return Err(StrataError::Contract(format!("{key}: page size must be positive")));
        }
        if size > self.config.max_page_size {
            return Err(StrataError::Contract(format!(
                "page size {size} exceeds the maximum of {}",
                self.config.max_page_size
            )));
        }
        let backward = spec.page.is_backward();
        let resume = decode_resume(tree, key, &spec.page)?;

        let timer = profile_timer();
        let mut stream = self.build_stream(tree, key, resume.as_ref(), backward, size + 1, ctx)?;
        record_profile_timer(QueryProfileKind::StreamBuild, timer);

        let mut items: Vec<Candidate> = Vec::with_capacity(size + 1);
        while items.len() <= size {
            let timer = profile_timer();
            let next = stream.try_next(ctx)?;
            record_profile_timer(QueryProfileKind::StreamIter, timer);
            match next {
                Some(candidate) => items.push(candidate),
                None => break,
            }
        }
        stream.finish(ctx)?;

        let has_more = items.len() > size;
        items.truncate(size);
        if backward {
            items.reverse();
        }
        let (has_next, has_previous) = if backward {
            (resume.is_some(), has_more)
        } else {
            (has_more, resume.is_some())
        };
        let mut edges = Vec::with_capacity(items.len());
        for candidate in items {
            edges.push(ConnectionEdge {
                cursor: candidate.cursor.encode()?,
                node: candidate.entity,
            });
        }
        let page = Connection::new(edges, has_next, has_previous)?;

        let mut meta = ctx
            .results
            .get(key)
            .map(|r| r.meta().clone())
            .unwrap_or_default();
        meta.has_more_data = has_more;
        meta.item_count = page.len();
        meta.cursor = page.page_info.end_cursor.clone();
        debug!(
            root = %key,
            items = page.len(),
            has_more,
            needs_more_data = meta.needs_more_data,
            "query.exec.page"
        );
        let (result, output) = match node.entity_kind() {
            EntityKind::Node => {
                let connection = page.try_map(|e| expect_node(key, e))?;
                (
                    GraphResult::NodeConnection(NodeConnectionResult {
                        connection: connection.clone(),
                        meta,
                    }),
                    QueryOutput::Nodes(connection),
                )
            }
            EntityKind::Edge => {
                let connection = page.try_map(|e| expect_edge(key, e))?;
                (
                    GraphResult::EdgeConnection(EdgeConnectionResult {
                        connection: connection.clone(),
                        meta,
                    }),
                    QueryOutput::Edges(connection),
                )
            }
        };
        ctx.results.insert(key.to_owned(), result);
        Ok(output)
    }

    fn evaluate_single(
        &self,
        tree: &QueryTree,
        key: &str,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Entity>> {
        let node = tree.node(key)?;
        let rounds_before = ctx.storage_rounds;
        let entity = match node {
            QueryNode::NodeById { id, .. } => {
                let found = ctx
                    .load_node(id)?
                    .ok_or_else(|| StrataError::not_found(format!("node {id}")))?;
                Some(Entity::Node(found))
            }
            QueryNode::NodeOrDefaultById { id, .. } => ctx.load_node(id)?.map(Entity::Node),
            QueryNode::NodeByNode { node: held, .. } => {
                let found = ctx
                    .load_node(&held.id)?
                    .ok_or_else(|| StrataError::not_found(format!("node {}", held.id)))?;
                Some(Entity::Node(found))
            }
            QueryNode::NodeVersionById { id, version, .. } => {
                let found = ctx
                    .load_node(id)?
                    .ok_or_else(|| StrataError::not_found(format!("node {id}")))?;
                if found.version() != *version {
                    return Err(StrataError::concurrency(
                        id,
                        format!("expected version {version}, found {}", found.version()),
                    ));
                }
                Some(Entity::Node(found))
            }
            QueryNode::EdgeById { id, .. } => {
                let found = ctx
                    .load_edge(id)?
                    .ok_or_else(|| StrataError::not_found(format!("edge {id}")))?;
                Some(Entity::Edge(found))
            }
            QueryNode::EdgeOrDefaultById { id, .. } => ctx.load_edge(id)?.map(Entity::Edge),
            QueryNode::ReduceNode { mode, .. } | QueryNode::ReduceEdge { mode, .. } => {
                self.reduce(tree, key, *mode, ctx)?
            }
            other => {
                return Err(StrataError::Contract(format!(
                    "{key} is a {} and yields a connection, not a single entity",
                    other.kind()
                )))
            }
        };
        let meta = ResultMeta {
            item_count: usize::from(entity.is_some()),
            storage_rounds: ctx.storage_rounds - rounds_before,
            ..ResultMeta::default()
        };
        let result = match node.entity_kind() {
            EntityKind::Node => GraphResult::Node(NodeResult {
                node: entity.clone().map(|e| expect_node(key, e)).transpose()?,
                meta,
            }),
            EntityKind::Edge => GraphResult::Edge(EdgeResult {
                edge: entity.clone().map(|e| expect_edge(key, e)).transpose()?,
                meta,
            }),
        };
        ctx.results.insert(key.to_owned(), result);
        Ok(entity)
    }

    fn reduce(
        &self,
        tree: &QueryTree,
        key: &str,
        mode: Reduction,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Entity>> {
        let child_key = only_child(tree, key)?;
        let child = tree.node(child_key)?;
        let page = connection_spec(child, child_key)?.page.clone();
        page.validate()?;
        let resume = decode_resume(tree, child_key, &page)?;
        let probe = mode.probe_size();
        let mut stream =
            self.build_stream(tree, child_key, resume.as_ref(), page.is_backward(), probe, ctx)?;
        let mut found: SmallVec<[Entity; 2]> = SmallVec::new();
        while found.len() < probe {
            match stream.try_next(ctx)? {
                Some(candidate) => found.push(candidate.entity),
                None => break,
            }
        }
        stream.finish(ctx)?;
        match found.len() {
            0 if mode.allows_empty() => Ok(None),
            0 => Err(StrataError::not_found(format!(
                "{key}: the reduced connection is empty"
            ))),
            1 => Ok(found.into_iter().next()),
            _ if matches!(mode, Reduction::First | Reduction::FirstOrDefault) => {
                Ok(found.into_iter().next())
            }
            _ => Err(StrataError::Contract(format!(
                "{key}: expected a single item but the connection holds more"
            ))),
        }
    }

    /// Builds the stream for the connection at `key`, resumed strictly after `resume`.
    fn build_stream(
        &self,
        tree: &QueryTree,
        key: &str,
        resume: Option<&Cursor>,
        backward: bool,
        want: usize,
        ctx: &mut ExecContext<'_>,
    ) -> Result<BoxCandidateStream> {
        let node = tree.node(key)?;
        let spec = connection_spec(node, key)?;
        let own = resume.map(Cursor::root_node);
        let fragment = |child: &str| resume.and_then(|c| c.sub_cursor(child));
        let forward = spec.order.descending == backward;
        let batch = self.batch_size(spec, want);
        let stream: BoxCandidateStream = match node {
            QueryNode::NodeConnection { type_name, spec } => Box::new(NodeScanStream::new(
                key,
                ScanPlan {
                    type_name: type_name.clone(),
                    order_prop: spec.order.prop.clone(),
                    forward,
                    batch,
                    filter: spec.filter.clone(),
                    tag: spec.tag.clone(),
                },
                own,
            )?),
            QueryNode::InToEdgeConnection { .. }
            | QueryNode::OutToEdgeConnection { .. }
            | QueryNode::InToAllEdgeConnection { .. }
            | QueryNode::OutToAllEdgeConnection { .. }
            | QueryNode::InAndOutToEdgeConnection { .. } => {
                let (mut phases, self_loop_prefix) = hop_phases(node);
                if !forward {
                    phases.reverse();
                }
                let child_key = only_child(tree, key)?;
                let child_fragment = fragment(child_key);
                let position = expect_position(key, own)?;
                let source =
                    self.source_input(tree, child_key, child_fragment.as_ref(), backward, want, ctx)?;
                let resume_at = match position {
                    Some(position) => {
                        let fragment = match child_fragment {
                            Some(fragment) => fragment,
                            None => Cursor::start(tree, child_key)?,
                        };
                        Some((position, fragment))
                    }
                    None => None,
                };
                let plan = HopPlan {
                    phases,
                    self_loop_prefix,
                    forward,
                    batch,
                    filter: spec.filter.clone(),
                    tag: spec.tag.clone(),
                };
                Box::new(HopStream::new(key, plan, source, resume_at)?)
            }
            QueryNode::InFromEdgeConnection { .. } | QueryNode::OutFromEdgeConnection { .. } => {
                let side = match node {
                    QueryNode::InFromEdgeConnection { .. } => EdgeSide::In,
                    _ => EdgeSide::Out,
                };
                expect_position(key, own)?;
                let child_key = only_child(tree, key)?;
                let child_fragment = fragment(child_key);
                let source =
                    self.source_input(tree, child_key, child_fragment.as_ref(), backward, want, ctx)?;
                Box::new(ResolveStream::new(
                    key,
                    side,
                    spec.filter.clone(),
                    spec.tag.clone(),
                    source,
                    resume.is_some(),
                ))
            }
            QueryNode::ZipNodeConnection { .. } => {
                if backward {
                    return Err(StrataError::Contract(format!(
                        "{key}: zip connections only page forward"
                    )));
                }
                let turn = expect_turn(key, own)?;
                let children = tree.children(key);
                let per_child = want / children.len().max(1) + 1;
                let mut streams = Vec::with_capacity(children.len());
                let mut fragments = Vec::with_capacity(children.len());
                for child in children {
                    let child_fragment = fragment(child.as_str());
                    streams.push(self.build_stream(
                        tree,
                        child,
                        child_fragment.as_ref(),
                        false,
                        per_child,
                        ctx,
                    )?);
                    fragments.push(match child_fragment {
                        Some(fragment) => fragment,
                        None => Cursor::start(tree, child)?,
                    });
                }
                Box::new(ZipStream::new(key, spec.tag.clone(), streams, fragments, turn))
            }
            QueryNode::WhereNodeConnection { predicate, .. } => {
                let predicate = WherePredicate::Node(predicate.clone());
                self.where_stream(tree, key, predicate, spec, resume, backward, want, ctx)?
            }
            QueryNode::WhereEdgeConnection { predicate, .. } => {
                let predicate = WherePredicate::Edge(predicate.clone());
                self.where_stream(tree, key, predicate, spec, resume, backward, want, ctx)?
            }
            other => {
                return Err(StrataError::Contract(format!(
                    "{key} is a {} and cannot be paged",
                    other.kind()
                )))
            }
        };
        Ok(stream)
    }

    #[allow(clippy::too_many_arguments)]
    fn where_stream(
        &self,
        tree: &QueryTree,
        key: &str,
        predicate: WherePredicate,
        spec: &ConnectionSpec,
        resume: Option<&Cursor>,
        backward: bool,
        want: usize,
        ctx: &mut ExecContext<'_>,
    ) -> Result<BoxCandidateStream> {
        expect_empty(key, resume.map(Cursor::root_node))?;
        let child_key = only_child(tree, key)?;
        let child_fragment = resume.and_then(|c| c.sub_cursor(child_key));
        let input_want = self.config.pre_filtered_size(want, true);
        let input = self.build_stream(
            tree,
            child_key,
            child_fragment.as_ref(),
            backward,
            input_want,
            ctx,
        )?;
        Ok(Box::new(WhereStream::new(
            key,
            predicate,
            spec.filter.clone(),
            spec.tag.clone(),
            input,
            resume.is_some(),
        )))
    }

    fn source_input(
        &self,
        tree: &QueryTree,
        key: &str,
        resume: Option<&Cursor>,
        backward: bool,
        want: usize,
        ctx: &mut ExecContext<'_>,
    ) -> Result<SourceInput> {
        let node = tree.node(key)?;
        if node.is_connection() {
            return Ok(SourceInput::Stream(
                self.build_stream(tree, key, resume, backward, want, ctx)?,
            ));
        }
        let entity = self.evaluate_single(tree, key, ctx)?;
        Ok(SourceInput::Single {
            entity,
            cursor: Cursor::leaf(key, CursorPayload::Empty),
            consumed: false,
        })
    }

    fn batch_size(&self, spec: &ConnectionSpec, want: usize) -> usize {
        match spec.pre_filtered_size {
            Some(explicit) => explicit.max(1),
            None => self.config.pre_filtered_size(want, spec.filter.is_some()),
        }
    }
}

fn connection_spec<'a>(node: &'a QueryNode, key: &str) -> Result<&'a ConnectionSpec> {
    node.connection_spec().ok_or_else(|| {
        StrataError::Contract(format!("{key} is a {} and not a connection", node.kind()))
    })
}

fn only_child<'a>(tree: &'a QueryTree, key: &str) -> Result<&'a str> {
    match tree.children(key) {
        [child] => Ok(child.as_str()),
        other => Err(StrataError::Contract(format!(
            "{key} needs exactly one child, has {}",
            other.len()
        ))),
    }
}

fn decode_resume(tree: &QueryTree, key: &str, page: &ConnectionArguments) -> Result<Option<Cursor>> {
    let Some(raw) = page.cursor() else {
        return Ok(None);
    };
    let cursor = Cursor::decode(raw)?;
    cursor.validate(tree, key)?;
    Ok(Some(cursor))
}

fn hop_phases(node: &QueryNode) -> (SmallVec<[String; 2]>, Option<String>) {
    match node {
        QueryNode::InToEdgeConnection { hop, .. } => (
            smallvec![edge_prefix(EdgeSide::In, Some(hop.edge_type.as_str()), hop.endpoint_type.as_deref())],
            None,
        ),
        QueryNode::OutToEdgeConnection { hop, .. } => (
            smallvec![edge_prefix(EdgeSide::Out, Some(hop.edge_type.as_str()), hop.endpoint_type.as_deref())],
            None,
        ),
        QueryNode::InToAllEdgeConnection { .. } => (smallvec![edge_prefix(EdgeSide::In, None, None)], None),
        QueryNode::InAndOutToEdgeConnection { edge_type, .. } => {
            let out = edge_prefix(EdgeSide::Out, Some(edge_type.as_str()), None);
            (
                smallvec![edge_prefix(EdgeSide::In, Some(edge_type.as_str()), None), out.clone()],
                Some(out),
            )
        }
        _ => (smallvec![edge_prefix(EdgeSide::Out, None, None)], None),
    }
}

/// Checks child counts and child kinds of every node.
fn validate_tree(tree: &QueryTree) -> Result<()> {
    for (key, node) in tree.iter() {
        let children = tree.children(key);
        let (min, max) = node.arity();
        if children.len() < min || children.len() > max {
            return Err(StrataError::Contract(format!(
                "{key} ({}) has {} children",
                node.kind(),
                children.len()
            )));
        }
        let Some((kind, shape)) = node.child_requirement() else {
            continue;
        };
        for child_key in children {
            let child = tree.node(child_key)?;
            if child.entity_kind() != kind || shape.is_some_and(|s| s != child.shape()) {
                return Err(StrataError::Contract(format!(
                    "{key} ({}) cannot take {child_key} ({}) as input",
                    node.kind(),
                    child.kind()
                )));
            }
        }
    }
    Ok(())
}

/// Every node of a tree must agree on `consistent_read`.
fn resolve_consistency(tree: &QueryTree) -> Result<bool> {
    let mut flags = tree.iter().map(|(_, node)| (node, node.consistent_read()));
    let Some((_, first)) = flags.next() else {
        return Ok(false);
    };
    for (node, flag) in flags {
        if flag != first {
            return Err(StrataError::Unsupported {
                operation: "mixed consistent_read",
                kind: node.kind(),
            });
        }
    }
    Ok(first)
}
