#![allow(missing_docs)]

use strata::{Edge, Filter, GraphClient, Node, NodeId, PutRequest, Result};

fn id(raw: &str) -> NodeId {
    NodeId::parse(raw).expect("valid id")
}

fn seeded() -> Result<GraphClient> {
    let client = GraphClient::in_memory();
    client.put(
        PutRequest::new()
            .put(Node::new(id("User:1")).with_prop("role", "admin"))
            .put(Node::new(id("User:2")).with_prop("role", "member"))
            .put(Node::new(id("User:3")).with_prop("role", "member"))
            .put(Edge::new("Owns", id("Repo:1"), id("User:1")))
            .put(Node::new(id("Repo:1"))),
    )?;
    Ok(client)
}

#[test]
fn single_requires_exactly_one_match() -> Result<()> {
    let client = seeded()?;
    let admin = client
        .nodes("User")
        .filter(Filter::eq("role", "admin"))
        .single()
        .get()?;
    assert_eq!(admin.map(|n| n.id), Some(id("User:1")));

    let ambiguous = client
        .nodes("User")
        .filter(Filter::eq("role", "member"))
        .single()
        .get()
        .unwrap_err();
    assert_eq!(ambiguous.code(), "ContractViolation");

    let empty = client
        .nodes("User")
        .filter(Filter::eq("role", "owner"))
        .single()
        .get()
        .unwrap_err();
    assert_eq!(empty.code(), "NotFound");
    Ok(())
}

#[test]
fn single_or_default_tolerates_only_emptiness() -> Result<()> {
    let client = seeded()?;
    let none = client
        .nodes("User")
        .filter(Filter::eq("role", "owner"))
        .single_or_default()
        .get()?;
    assert!(none.is_none());

    let err = client
        .nodes("User")
        .single_or_default()
        .get()
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    Ok(())
}

#[test]
fn first_takes_the_head_of_the_connection() -> Result<()> {
    let client = seeded()?;
    let first = client
        .nodes("User")
        .filter(Filter::eq("role", "member"))
        .first()
        .get()?;
    assert_eq!(first.map(|n| n.id), Some(id("User:2")));

    let err = client.nodes("Team").first().get().unwrap_err();
    assert_eq!(err.code(), "NotFound");
    assert!(client.nodes("Team").first_or_default().get()?.is_none());
    assert!(!client.nodes("Team").any()?);
    assert!(client.nodes("User").any()?);
    Ok(())
}

#[test]
fn edge_reductions_follow_the_same_rules() -> Result<()> {
    let client = seeded()?;
    let owner_edge = client.node(id("User:1")).out_edges("Owns").single().get()?;
    assert_eq!(owner_edge.map(|e| e.in_id), Some(id("Repo:1")));

    let none = client
        .node(id("User:2"))
        .out_edges("Owns")
        .first_or_default()
        .get()?;
    assert!(none.is_none());

    let repo = client
        .node(id("User:1"))
        .out_edges("Owns")
        .single()
        .in_nodes()
        .get_entities()?;
    assert_eq!(repo.len(), 1);
    Ok(())
}

#[test]
fn reductions_record_their_input_connection() -> Result<()> {
    let client = seeded()?;
    let result = client
        .nodes("User")
        .filter(Filter::eq("role", "member"))
        .first()
        .execute()?;
    assert_eq!(result.root_key, "1");
    assert_eq!(result.root()?.meta().item_count, 1);
    let probed = result.result("0")?.node_connection()?;
    assert_eq!(probed.len(), 1);
    Ok(())
}
