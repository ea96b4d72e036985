#![allow(missing_docs)]

use strata::{ConnectionArguments, Filter, GraphClient, Node, NodeId, PutRequest, Result};

fn seeded() -> Result<GraphClient> {
    let client = GraphClient::in_memory();
    let mut request = PutRequest::new();
    for ty in ["A", "B"] {
        for i in 0..5 {
            request = request.put(Node::new(NodeId::new(ty, &i.to_string())?).with_prop("n", i));
        }
    }
    client.put(request)?;
    Ok(client)
}

fn labels(nodes: Vec<Node>) -> Vec<String> {
    nodes
        .into_iter()
        .map(|n| format!("{}{}", n.type_name(), n.id.key()))
        .collect()
}

#[test]
fn zip_interleaves_and_resumes_round_robin() -> Result<()> {
    let client = seeded()?;
    let zipped = || client.zip([client.nodes("A"), client.nodes("B")]).page_size(5);

    let first = zipped().get()?;
    assert!(first.page_info.has_next_page);
    let cursor = first.page_info.end_cursor.clone().unwrap_or_default();
    assert_eq!(labels(first.into_nodes()), ["A0", "B0", "A1", "B1", "A2"]);

    let second = zipped().after(cursor).get()?;
    assert!(!second.page_info.has_next_page);
    assert!(second.page_info.has_previous_page);
    assert_eq!(labels(second.into_nodes()), ["B2", "A3", "B3", "A4", "B4"]);
    Ok(())
}

#[test]
fn exhausted_branches_drop_out_of_the_rotation() -> Result<()> {
    let client = seeded()?;
    let zipped = client
        .zip([
            client.nodes("A").filter(Filter::lt("n", 1)),
            client.nodes("B"),
        ])
        .page_size(4)
        .get()?;
    assert_eq!(labels(zipped.into_nodes()), ["A0", "B0", "B1", "B2"]);
    Ok(())
}

#[test]
fn zip_pages_only_forward() -> Result<()> {
    let client = seeded()?;
    let err = client
        .zip([client.nodes("A"), client.nodes("B")])
        .page(ConnectionArguments::backward(2, None))
        .get()
        .unwrap_err();
    assert_eq!(err.code(), "ContractViolation");
    Ok(())
}

#[test]
fn zip_results_are_recorded_per_branch() -> Result<()> {
    let client = seeded()?;
    let result = client
        .zip([client.nodes("A").tag("left"), client.nodes("B").tag("right")])
        .page_size(3)
        .execute()?;
    assert_eq!(result.root_key, "2");
    let left = result.result("0.0")?;
    assert_eq!(left.meta().tag.as_deref(), Some("left"));
    assert!(result.result("1.0")?.node_connection()?.len() >= 1);
    Ok(())
}
