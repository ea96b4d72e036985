#![allow(missing_docs)]

use strata::{
    ConnectionArguments, Edge, EdgeId, EdgeSide, Filter, GraphClient, Node, NodeId, PutRequest,
    Result,
};

fn id(raw: &str) -> NodeId {
    NodeId::parse(raw).expect("valid id")
}

/// User:1 follows 2, 3 and 4; User:2 follows 3; User:4 follows itself.
/// User:1 authored Post:1, User:2 authored Post:2.
fn social() -> Result<GraphClient> {
    let client = GraphClient::in_memory();
    let mut request = PutRequest::new();
    for raw in ["User:1", "User:2", "User:3", "User:4", "Post:1", "Post:2"] {
        request = request.put(Node::new(id(raw)));
    }
    client.put(request)?;

    let follows = |from: &str, to: &str, since: i64| {
        Edge::new("Follows", id(to), id(from)).with_prop("since", since)
    };
    client.put(
        PutRequest::new()
            .put(follows("User:1", "User:2", 2019))
            .put(follows("User:1", "User:3", 2020))
            .put(follows("User:1", "User:4", 2021))
            .put(follows("User:2", "User:3", 2022))
            .put(follows("User:4", "User:4", 2023))
            .put(Edge::new("Authored", id("Post:1"), id("User:1")))
            .put(Edge::new("Authored", id("Post:2"), id("User:2"))),
    )?;
    Ok(client)
}

fn node_ids(nodes: Vec<Node>) -> Vec<String> {
    nodes.into_iter().map(|n| n.id.to_string()).collect()
}

fn edge_pairs(edges: Vec<Edge>) -> Vec<(String, String)> {
    edges
        .into_iter()
        .map(|e| (e.in_id.to_string(), e.out_id.to_string()))
        .collect()
}

#[test]
fn hop_then_resolve_lists_followed_users() -> Result<()> {
    let client = social()?;
    let followed = client
        .node(id("User:1"))
        .out_edges("Follows")
        .in_nodes()
        .get_entities()?;
    assert_eq!(node_ids(followed), ["User:2", "User:3", "User:4"]);
    Ok(())
}

#[test]
fn hop_pages_resume_inside_the_partition() -> Result<()> {
    let client = social()?;
    let first = client
        .node(id("User:1"))
        .out_edges("Follows")
        .page_size(2)
        .get()?;
    assert!(first.page_info.has_next_page);
    let cursor = first.page_info.end_cursor.clone().unwrap_or_default();
    assert_eq!(
        edge_pairs(first.into_nodes()),
        [
            ("User:2".to_owned(), "User:1".to_owned()),
            ("User:3".to_owned(), "User:1".to_owned())
        ]
    );

    let rest = client
        .node(id("User:1"))
        .out_edges("Follows")
        .page(ConnectionArguments::forward(2, Some(cursor)))
        .get()?;
    assert!(!rest.page_info.has_next_page);
    assert!(rest.page_info.has_previous_page);
    assert_eq!(
        edge_pairs(rest.into_nodes()),
        [("User:4".to_owned(), "User:1".to_owned())]
    );
    Ok(())
}

#[test]
fn resolving_a_single_edge_does_not_repeat_after_its_cursor() -> Result<()> {
    let client = social()?;
    let authored = EdgeId::new("Authored", id("Post:1"), id("User:1"));
    let first = client.edge(authored.clone()).in_nodes().get()?;
    assert!(!first.page_info.has_next_page);
    let cursor = first.page_info.end_cursor.clone().unwrap_or_default();
    assert_eq!(node_ids(first.into_nodes()), ["Post:1"]);

    let rest = client.edge(authored).in_nodes().after(cursor).get()?;
    assert!(rest.is_empty());
    assert!(!rest.page_info.has_next_page);
    assert!(rest.page_info.has_previous_page);
    Ok(())
}

#[test]
fn nested_hops_resume_across_source_nodes() -> Result<()> {
    let client = social()?;
    let query = || client.nodes("User").out_edges("Follows").in_nodes();

    let first = query().page_size(3).get()?;
    let cursor = first.page_info.end_cursor.clone().unwrap_or_default();
    assert_eq!(node_ids(first.into_nodes()), ["User:2", "User:3", "User:4"]);

    let second = query().page_size(3).after(cursor).get()?;
    assert_eq!(node_ids(second.into_nodes()), ["User:3", "User:4"]);
    Ok(())
}

#[test]
fn endpoint_type_narrows_the_hop() -> Result<()> {
    let client = social()?;
    let posts = client
        .node(id("User:1"))
        .edges_to(EdgeSide::Out, "Authored", "Post")
        .in_nodes()
        .get_entities()?;
    assert_eq!(node_ids(posts), ["Post:1"]);

    let none = client
        .node(id("User:1"))
        .edges_to(EdgeSide::Out, "Follows", "Post")
        .any()?;
    assert!(!none);
    Ok(())
}

#[test]
fn all_edge_hops_cover_every_type() -> Result<()> {
    let client = social()?;
    let out = client.node(id("User:1")).all_out_edges().get_entities()?;
    let types: Vec<&str> = out.iter().map(|e| e.edge_type.as_str()).collect();
    assert_eq!(types, ["Authored", "Follows", "Follows", "Follows"]);

    let incoming = client.node(id("User:3")).all_in_edges().get_entities()?;
    assert_eq!(
        edge_pairs(incoming),
        [
            ("User:3".to_owned(), "User:1".to_owned()),
            ("User:3".to_owned(), "User:2".to_owned())
        ]
    );
    Ok(())
}

#[test]
fn bidirectional_hop_returns_both_directions_and_self_loops_once() -> Result<()> {
    let client = social()?;
    let both = client.node(id("User:2")).edges("Follows").get_entities()?;
    assert_eq!(
        edge_pairs(both),
        [
            ("User:2".to_owned(), "User:1".to_owned()),
            ("User:3".to_owned(), "User:2".to_owned())
        ]
    );

    let forward = client.node(id("User:4")).edges("Follows").get_entities()?;
    assert_eq!(
        edge_pairs(forward.clone()),
        [
            ("User:4".to_owned(), "User:1".to_owned()),
            ("User:4".to_owned(), "User:4".to_owned())
        ]
    );

    let backward = client
        .node(id("User:4"))
        .edges("Follows")
        .page(ConnectionArguments::backward(10, None))
        .get_entities()?;
    assert_eq!(backward, forward);
    Ok(())
}

#[test]
fn edge_filters_and_predicates_apply_per_item() -> Result<()> {
    let client = social()?;
    let recent = client
        .node(id("User:1"))
        .out_edges("Follows")
        .filter(Filter::gt("since", 2019))
        .in_nodes()
        .get_entities()?;
    assert_eq!(node_ids(recent), ["User:3", "User:4"]);

    let odd = client
        .node(id("User:1"))
        .out_edges("Follows")
        .where_edge("odd year", |e| {
            e.prop("since").and_then(|v| v.as_i64()).unwrap_or(0) % 2 == 1
        })
        .get_entities()?;
    assert_eq!(odd.len(), 2);

    let upper = client
        .nodes("User")
        .where_node("has key above 2", |n| n.id.key() > "2")
        .get_entities()?;
    assert_eq!(node_ids(upper), ["User:3", "User:4"]);
    Ok(())
}

#[test]
fn deleted_endpoints_are_skipped_during_resolution() -> Result<()> {
    let client = social()?;
    let mut gone = client
        .node(id("User:3"))
        .get()?
        .ok_or_else(|| strata::StrataError::not_found("User:3"))?;
    gone.deleted_at = Some(42);
    client.put(PutRequest::new().put(gone))?;

    let followed = client
        .node(id("User:1"))
        .out_edges("Follows")
        .in_nodes()
        .get_entities()?;
    assert_eq!(node_ids(followed), ["User:2", "User:4"]);
    Ok(())
}

#[test]
fn identity_lookups_report_missing_entities() -> Result<()> {
    let client = social()?;
    let edge = client
        .edge(EdgeId::new("Follows", id("User:2"), id("User:1")))
        .get()?;
    assert_eq!(edge.and_then(|e| e.prop("since").cloned()), Some(2019.into()));

    let missing = EdgeId::new("Follows", id("User:1"), id("User:2"));
    assert!(client.edge_or_default(missing.clone()).get()?.is_none());
    assert_eq!(client.edge(missing).get().unwrap_err().code(), "NotFound");

    let err = client
        .node(id("User:9"))
        .out_edges("Follows")
        .get()
        .unwrap_err();
    assert_eq!(err.code(), "NotFound");
    assert!(client.node_or_default(id("User:9")).get()?.is_none());
    Ok(())
}

#[test]
fn version_lookups_detect_stale_reads() -> Result<()> {
    let client = social()?;
    let current = client
        .node(id("User:2"))
        .get()?
        .ok_or_else(|| strata::StrataError::not_found("User:2"))?;
    assert!(client
        .node_version(id("User:2"), current.version())
        .any()?);
    let err = client
        .node_version(id("User:2"), current.version() - 1)
        .get()
        .unwrap_err();
    assert!(err.is_retryable());

    let fresh = client.node_by_node(Node::new(id("User:2"))).get()?;
    assert_eq!(fresh.map(|n| n.version()), Some(current.version()));
    Ok(())
}
