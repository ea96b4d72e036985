use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of engine profiling metrics.
///
/// Profiling is enabled via the `STRATA_PROFILE` environment variable and
/// tracks where query executions and mutations spend their time.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent waiting on storage range queries.
    pub storage_round_ns: u64,
    /// Number of storage range queries issued.
    pub storage_round_count: u64,
    /// Total nanoseconds spent building candidate streams.
    pub stream_build_ns: u64,
    /// Number of stream build operations.
    pub stream_build_count: u64,
    /// Total nanoseconds spent pulling the root stream.
    pub stream_iter_ns: u64,
    /// Number of root stream pulls.
    pub stream_iter_count: u64,
    /// Total nanoseconds spent resolving edge endpoints to nodes.
    pub resolve_ns: u64,
    /// Number of endpoint resolutions.
    pub resolve_count: u64,
    /// Total nanoseconds spent evaluating filters and predicates.
    pub filter_ns: u64,
    /// Number of filter evaluations.
    pub filter_count: u64,
    /// Total nanoseconds spent committing mutation write sets.
    pub commit_ns: u64,
    /// Number of mutation commits.
    pub commit_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    storage_round_ns: AtomicU64,
    storage_round_count: AtomicU64,
    stream_build_ns: AtomicU64,
    stream_build_count: AtomicU64,
    stream_iter_ns: AtomicU64,
    stream_iter_count: AtomicU64,
    resolve_ns: AtomicU64,
    resolve_count: AtomicU64,
    filter_ns: AtomicU64,
    filter_count: AtomicU64,
    commit_ns: AtomicU64,
    commit_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("STRATA_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// One storage range query.
    StorageRound,
    /// Building the stream tree for an execution.
    StreamBuild,
    /// Pulling one item from the root stream.
    StreamIter,
    /// Loading a node for an edge endpoint.
    Resolve,
    /// Evaluating a filter or predicate.
    Filter,
    /// Committing a mutation write set.
    Commit,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::StorageRound => (&counters.storage_round_ns, &counters.storage_round_count),
        QueryProfileKind::StreamBuild => (&counters.stream_build_ns, &counters.stream_build_count),
        QueryProfileKind::StreamIter => (&counters.stream_iter_ns, &counters.stream_iter_count),
        QueryProfileKind::Resolve => (&counters.resolve_ns, &counters.resolve_count),
        QueryProfileKind::Filter => (&counters.filter_ns, &counters.filter_count),
        QueryProfileKind::Commit => (&counters.commit_ns, &counters.commit_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current profiling metrics.
///
/// Returns `None` unless `STRATA_PROFILE` is set. When `reset` is `true` the
/// counters are zeroed as they are read.
///
/// ```no_run
/// use strata::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("storage rounds: {}", snapshot.storage_round_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        storage_round_ns: load(&counters.storage_round_ns),
        storage_round_count: load(&counters.storage_round_count),
        stream_build_ns: load(&counters.stream_build_ns),
        stream_build_count: load(&counters.stream_build_count),
        stream_iter_ns: load(&counters.stream_iter_ns),
        stream_iter_count: load(&counters.stream_iter_count),
        resolve_ns: load(&counters.resolve_ns),
        resolve_count: load(&counters.resolve_count),
        filter_ns: load(&counters.filter_ns),
        filter_count: load(&counters.filter_count),
        commit_ns: load(&counters.commit_ns),
        commit_count: load(&counters.commit_count),
    })
}
