#![allow(missing_docs)]

use std::collections::HashSet;

use strata::{
    query::{from_cursor_exclusive, to_cursor_inclusive},
    ConnectionArguments, Filter, GraphClient, Node, NodeId, Order, PutRequest,
};

fn users(client: &GraphClient, count: usize) -> strata::Result<()> {
    let mut request = PutRequest::new();
    for i in 1..=count {
        let id = NodeId::new("User", &i.to_string())?;
        request = request.put(Node::new(id).with_prop("age", 20 + i as i64));
    }
    client.put(request)?;
    Ok(())
}

fn ids(nodes: &[Node]) -> Vec<String> {
    nodes.iter().map(|n| n.id.to_string()).collect()
}

#[test]
fn forward_pages_concatenate_without_gaps_or_duplicates() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 5)?;

    let mut sizes = Vec::new();
    let mut seen = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = client
            .nodes("User")
            .page(ConnectionArguments::forward(2, after.clone()))
            .get()?;
        sizes.push(page.len());
        assert_eq!(page.page_info.has_previous_page, after.is_some());
        seen.extend(page.nodes().map(|n| n.id.to_string()));
        if !page.page_info.has_next_page {
            break;
        }
        after = page.page_info.end_cursor.clone();
    }

    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(seen, ["User:1", "User:2", "User:3", "User:4", "User:5"]);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());
    Ok(())
}

#[test]
fn backward_pages_keep_presentation_order() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 5)?;

    let tail = client
        .nodes("User")
        .page(ConnectionArguments::backward(2, None))
        .get()?;
    assert_eq!(ids(&tail.clone().into_nodes()), ["User:4", "User:5"]);
    assert!(tail.page_info.has_previous_page);
    assert!(!tail.page_info.has_next_page);

    let before = tail.page_info.start_cursor.clone();
    let middle = client
        .nodes("User")
        .page(ConnectionArguments::backward(2, before))
        .get()?;
    assert_eq!(ids(&middle.clone().into_nodes()), ["User:2", "User:3"]);
    assert!(middle.page_info.has_next_page);
    assert!(middle.page_info.has_previous_page);

    let head = client
        .nodes("User")
        .page(ConnectionArguments::backward(2, middle.page_info.start_cursor.clone()))
        .get()?;
    assert_eq!(ids(&head.clone().into_nodes()), ["User:1"]);
    assert!(!head.page_info.has_previous_page);
    Ok(())
}

#[test]
fn cursors_from_one_page_resume_the_same_query() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 5)?;

    let all = client.nodes("User").page_size(5).get()?;
    let cursors: Vec<String> = all.cursors().map(str::to_owned).collect();
    let resumed = client
        .nodes("User")
        .page(ConnectionArguments::forward(5, Some(cursors[1].clone())))
        .get()?;
    let expected: Vec<String> = from_cursor_exclusive(&all.edges, &cursors[1])?
        .iter()
        .map(|e| e.node.id.to_string())
        .collect();
    assert_eq!(ids(&resumed.into_nodes()), expected);

    let prefix = to_cursor_inclusive(&all.edges, &cursors[1])?;
    assert_eq!(prefix.len(), 2);
    Ok(())
}

#[test]
fn filtered_scans_refetch_until_the_page_is_full() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 12)?;

    let page = client
        .nodes("User")
        .filter(Filter::gt("age", 26))
        .pre_filtered_size(2)
        .page_size(3)
        .execute()?;
    // ids sort as text, so User:10..12 come before User:7..9
    let meta = page.root()?.meta();
    assert_eq!(meta.item_count, 3);
    assert!(meta.storage_rounds > 1);
    let nodes = page.output.into_nodes()?;
    assert_eq!(ids(&nodes.into_nodes()), ["User:10", "User:11", "User:12"]);
    Ok(())
}

#[test]
fn property_order_pages_by_value() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 4)?;

    let oldest_first = client
        .nodes("User")
        .order(Order::by_prop("age").desc())
        .page_size(2)
        .get()?;
    assert_eq!(ids(&oldest_first.clone().into_nodes()), ["User:4", "User:3"]);

    let rest = client
        .nodes("User")
        .order(Order::by_prop("age").desc())
        .after(oldest_first.page_info.end_cursor.clone().unwrap_or_default())
        .page_size(2)
        .get()?;
    assert_eq!(ids(&rest.into_nodes()), ["User:2", "User:1"]);
    Ok(())
}

#[test]
fn property_order_keeps_nodes_without_the_property() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    client.put(
        PutRequest::new()
            .put(Node::new(NodeId::parse("User:1")?).with_prop("age", 30))
            .put(Node::new(NodeId::parse("User:2")?).with_prop("name", "ada"))
            .put(Node::new(NodeId::parse("User:3")?).with_prop("age", 20))
            .put(Node::new(NodeId::parse("User:4")?).with_prop("age", serde_json::Value::Null)),
    )?;

    let ascending = client
        .nodes("User")
        .order(Order::by_prop("age"))
        .page_size(3)
        .get()?;
    assert!(ascending.page_info.has_next_page);
    let cursor = ascending.page_info.end_cursor.clone().unwrap_or_default();
    assert_eq!(ids(&ascending.into_nodes()), ["User:3", "User:1", "User:2"]);

    let rest = client
        .nodes("User")
        .order(Order::by_prop("age"))
        .page_size(3)
        .after(cursor)
        .get()?;
    assert!(!rest.page_info.has_next_page);
    assert_eq!(ids(&rest.into_nodes()), ["User:4"]);

    let descending = client
        .nodes("User")
        .order(Order::by_prop("age").desc())
        .get_entities()?;
    assert_eq!(ids(&descending), ["User:4", "User:2", "User:1", "User:3"]);
    Ok(())
}

#[test]
fn empty_pages_are_rejected() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 2)?;

    let err = client.nodes("User").page_size(0).get().unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    let err = client
        .nodes("User")
        .page(ConnectionArguments::forward(0, None))
        .get()
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    Ok(())
}

#[test]
fn cursor_misuse_is_a_contract_violation() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 3)?;

    let err = client
        .nodes("User")
        .after("definitely-not-a-cursor")
        .get()
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");

    let edge_cursor = client.nodes("User").page_size(1).get()?.page_info.end_cursor;
    let err = client
        .node(NodeId::parse("User:1")?)
        .out_edges("Follows")
        .after(edge_cursor.unwrap_or_default())
        .get()
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");

    let mixed = ConnectionArguments {
        first: Some(1),
        last: Some(1),
        ..ConnectionArguments::default()
    };
    let err = client.nodes("User").page(mixed).get().unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    Ok(())
}

#[test]
fn soft_deleted_nodes_leave_type_scans() -> strata::Result<()> {
    let client = GraphClient::in_memory();
    users(&client, 3)?;

    let node = client
        .node(NodeId::parse("User:2")?)
        .get()?
        .ok_or_else(|| strata::StrataError::not_found("User:2"))?;
    let mut deleted = node.clone();
    deleted.deleted_at = Some(1);
    client.put(PutRequest::new().put(deleted))?;

    let page = client.nodes("User").get()?;
    assert_eq!(ids(&page.into_nodes()), ["User:1", "User:3"]);
    Ok(())
}
