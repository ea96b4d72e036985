#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use strata::{
    storage::{PutOutcome, TriplePage, TripleQuery, WriteSet},
    Edge, EdgeByPropCheck, EdgeId, EdgeSide, EngineConfig, ExecuteOptions, GraphClient,
    MemoryTripleStore, Mutator, Node, NodeId, PutOptions, PutRequest, Result, TripleStore,
};

fn id(raw: &str) -> NodeId {
    NodeId::parse(raw).expect("valid id")
}

/// Store that commits a competing request right before the next put reaches it.
struct RacingStore {
    inner: Arc<MemoryTripleStore>,
    rival: Mutex<Option<PutRequest>>,
}

impl RacingStore {
    fn new(inner: Arc<MemoryTripleStore>) -> Self {
        Self {
            inner,
            rival: Mutex::new(None),
        }
    }

    fn race_with(&self, request: PutRequest) {
        *self.rival.lock() = Some(request);
    }
}

impl TripleStore for RacingStore {
    fn query_by_partition_and_indexed_object(&self, query: &TripleQuery) -> Result<TriplePage> {
        self.inner.query_by_partition_and_indexed_object(query)
    }

    fn put(&self, writes: WriteSet) -> Result<PutOutcome> {
        let rival = self.rival.lock().take();
        if let Some(request) = rival {
            Mutator::new(self.inner.clone(), EngineConfig::default()).put(request)?;
        }
        self.inner.put(writes)
    }

    fn clear(&self, table: &str) -> Result<()> {
        self.inner.clear(table)
    }
}

/// Store that raises a cancellation flag as soon as it serves a read.
struct CancellingStore {
    inner: Arc<MemoryTripleStore>,
    flag: Arc<AtomicBool>,
}

impl TripleStore for CancellingStore {
    fn query_by_partition_and_indexed_object(&self, query: &TripleQuery) -> Result<TriplePage> {
        self.flag.store(true, Ordering::Relaxed);
        self.inner.query_by_partition_and_indexed_object(query)
    }

    fn put(&self, writes: WriteSet) -> Result<PutOutcome> {
        self.inner.put(writes)
    }

    fn clear(&self, table: &str) -> Result<()> {
        self.inner.clear(table)
    }
}

fn racing() -> (Arc<RacingStore>, GraphClient) {
    let store = Arc::new(RacingStore::new(Arc::new(MemoryTripleStore::new())));
    let client = GraphClient::new(store.clone(), EngineConfig::default());
    (store, client)
}

fn read(client: &GraphClient, raw: &str) -> Result<Node> {
    client
        .node(id(raw))
        .get()?
        .ok_or_else(|| strata::StrataError::not_found(raw))
}

fn pair(client: &GraphClient) -> Result<()> {
    client.put(
        PutRequest::new()
            .put(Node::new(id("User:1")).with_prop("name", "ada"))
            .put(Node::new(id("User:2")).with_prop("name", "grace")),
    )?;
    Ok(())
}

#[test]
fn concurrent_update_between_read_and_put_is_rejected() -> Result<()> {
    let client = GraphClient::in_memory();
    pair(&client)?;

    let mine = read(&client, "User:1")?;
    let theirs = read(&client, "User:1")?;
    client.put(PutRequest::new().put(theirs.with_prop("name", "lovelace")))?;

    let err = client
        .put(PutRequest::new().put(mine.with_prop("name", "byron")))
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(read(&client, "User:1")?.prop("name"), Some(&"lovelace".into()));
    Ok(())
}

#[test]
fn commit_time_rejection_applies_nothing() -> Result<()> {
    let (store, client) = racing();
    pair(&client)?;

    let mine = read(&client, "User:1")?;
    let theirs = read(&client, "User:1")?;
    store.race_with(PutRequest::new().put(theirs.with_prop("name", "lovelace")));

    let err = client
        .put(
            PutRequest::new()
                .put(mine.with_prop("name", "byron"))
                .put(Node::new(id("User:3"))),
        )
        .unwrap_err();
    assert_eq!(err.code(), "ConcurrencyViolation");
    assert_eq!(read(&client, "User:1")?.prop("name"), Some(&"lovelace".into()));
    assert!(client.node_or_default(id("User:3")).get()?.is_none());
    Ok(())
}

#[test]
fn racing_create_maps_to_a_contract_violation() -> Result<()> {
    let (store, client) = racing();
    store.race_with(PutRequest::new().put(Node::new(id("User:7"))));
    let err = client
        .put(PutRequest::new().put(Node::new(id("User:7"))))
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    Ok(())
}

#[test]
fn edge_writes_touch_endpoints_unless_exempted() -> Result<()> {
    let client = GraphClient::in_memory();
    pair(&client)?;

    let result = client.put(PutRequest::new().put(Edge::new("Follows", id("User:2"), id("User:1"))))?;
    assert_eq!(result.touched.len(), 2);
    assert_eq!(read(&client, "User:1")?.version(), 2);
    assert_eq!(read(&client, "User:2")?.version(), 2);

    client.put(
        PutRequest::new()
            .put(Edge::new("Likes", id("User:2"), id("User:1")))
            .without_edge_checks_for(id("User:2")),
    )?;
    assert_eq!(read(&client, "User:1")?.version(), 3);
    assert_eq!(read(&client, "User:2")?.version(), 2);
    Ok(())
}

#[test]
fn changed_edge_sets_fail_the_all_edges_check() -> Result<()> {
    let (store, client) = racing();
    pair(&client)?;

    let observed = read(&client, "User:1")?;
    client.put(PutRequest::new().put(Edge::new("Follows", id("User:2"), id("User:1"))))?;
    let err = client
        .put(
            PutRequest::new()
                .put(Node::new(id("User:3")))
                .check_all_edges(observed),
        )
        .unwrap_err();
    assert!(err.is_retryable());

    let fresh = read(&client, "User:1")?;
    store.race_with(PutRequest::new().remove_edge(EdgeId::new("Follows", id("User:2"), id("User:1"))));
    let err = client
        .put(
            PutRequest::new()
                .put(Node::new(id("User:3")))
                .check_all_edges(fresh.clone()),
        )
        .unwrap_err();
    assert_eq!(err.code(), "ConcurrencyViolation");

    let current = read(&client, "User:1")?;
    client.put(
        PutRequest::new()
            .put(Node::new(id("User:3")))
            .check_all_edges(current),
    )?;
    Ok(())
}

#[test]
fn edge_property_assertions_guard_the_write() -> Result<()> {
    let client = GraphClient::in_memory();
    pair(&client)?;
    client.put(
        PutRequest::new().put(Edge::new("Follows", id("User:2"), id("User:1")).with_prop("since", 2020)),
    )?;

    let check = |value: i64, exists: bool| EdgeByPropCheck {
        node_id: id("User:1"),
        edge_type: "Follows".into(),
        side: EdgeSide::Out,
        prop: "since".into(),
        value: value.into(),
        exists,
    };

    client.put(
        PutRequest::new()
            .put(Node::new(id("Audit:1")))
            .check_edge_by_prop(check(2020, true))
            .check_edge_by_prop(check(1999, false)),
    )?;

    let err = client
        .put(
            PutRequest::new()
                .put(Node::new(id("Audit:2")))
                .check_edge_by_prop(check(2020, false)),
        )
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(client.node_or_default(id("Audit:2")).get()?.is_none());
    Ok(())
}

#[test]
fn removing_edges_requires_them_to_exist() -> Result<()> {
    let client = GraphClient::in_memory();
    pair(&client)?;
    let edge = EdgeId::new("Follows", id("User:2"), id("User:1"));
    client.put(PutRequest::new().put(Edge::new("Follows", id("User:2"), id("User:1"))))?;

    let removed = client.put(PutRequest::new().remove_edge(edge.clone()))?;
    assert_eq!(removed.removed_edges, vec![edge.clone()]);
    assert!(client.edge_or_default(edge.clone()).get()?.is_none());
    assert_eq!(read(&client, "User:1")?.version(), 3);

    let err = client.put(PutRequest::new().remove_edge(edge)).unwrap_err();
    assert_eq!(err.code(), "NotFound");
    Ok(())
}

#[test]
fn requests_keep_caller_mutation_ids() -> Result<()> {
    let client = GraphClient::in_memory();
    let result = client.put(
        PutRequest::new()
            .with_mutation_id("import-42")
            .put(Edge::new("Owns", id("Repo:1"), id("User:1")))
            .put(Node::new(id("User:1")))
            .put(Node::new(id("Repo:1"))),
    )?;
    assert_eq!(result.mutation_id, "import-42");
    assert_eq!(result.nodes.len(), 2);
    assert!(result.touched.is_empty());

    let err = client
        .put(
            PutRequest::new()
                .put(Node::new(id("User:5")))
                .put(Node::new(id("User:5"))),
        )
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    Ok(())
}

#[test]
fn put_requests_round_trip_through_json() -> Result<()> {
    let request = PutRequest::new()
        .put(Node::new(id("User:1")).with_prop("name", "ada"))
        .remove_edge(EdgeId::new("Follows", id("User:2"), id("User:1")))
        .without_node_edge_checks();
    let json = serde_json::to_string(&request)?;
    assert!(json.contains("\"kind\":\"removeEdge\""));
    let back: PutRequest = serde_json::from_str(&json)?;
    assert_eq!(back, request);
    Ok(())
}

#[test]
fn cancelled_puts_write_nothing() -> Result<()> {
    let store = Arc::new(MemoryTripleStore::new());
    let client = GraphClient::new(store.clone(), EngineConfig::default());
    let flag = Arc::new(AtomicBool::new(true));
    let opts = PutOptions {
        cancel: Some(flag.clone()),
    };

    let err = client
        .put_with(PutRequest::new().put(Node::new(id("User:1"))), &opts)
        .unwrap_err();
    assert_eq!(err.code(), "Cancelled");
    assert!(!err.is_retryable());
    assert_eq!(store.row_count(&EngineConfig::default().table), 0);

    flag.store(false, Ordering::Relaxed);
    client.put_with(PutRequest::new().put(Node::new(id("User:1"))), &opts)?;
    assert!(store.row_count(&EngineConfig::default().table) > 0);
    Ok(())
}

#[test]
fn cancellation_after_planning_stops_the_commit() -> Result<()> {
    let inner = Arc::new(MemoryTripleStore::new());
    let flag = Arc::new(AtomicBool::new(false));
    let store = Arc::new(CancellingStore {
        inner: inner.clone(),
        flag: flag.clone(),
    });
    let mutator = Mutator::new(store, EngineConfig::default());
    let opts = PutOptions {
        cancel: Some(flag.clone()),
    };

    let err = mutator
        .put_with(PutRequest::new().put(Node::new(id("User:1"))), &opts)
        .unwrap_err();
    assert_eq!(err.code(), "Cancelled");
    assert!(flag.load(Ordering::Relaxed));
    assert_eq!(inner.row_count(&EngineConfig::default().table), 0);
    Ok(())
}

#[test]
fn cancelled_queries_fail_before_reading() -> Result<()> {
    let client = GraphClient::in_memory();
    pair(&client)?;
    let opts = ExecuteOptions {
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..ExecuteOptions::default()
    };

    let err = client.nodes("User").execute_with(&opts).unwrap_err();
    assert_eq!(err.code(), "Cancelled");
    let err = client
        .node(id("User:1"))
        .out_edges("Follows")
        .execute_with(&opts)
        .unwrap_err();
    assert_eq!(err.code(), "Cancelled");
    assert_eq!(client.nodes("User").get()?.len(), 2);
    Ok(())
}
