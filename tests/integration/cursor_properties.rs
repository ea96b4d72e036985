#![allow(missing_docs)]

use std::collections::HashSet;

use proptest::prelude::*;
use strata::{
    query::{CursorPayload, QueryNode},
    storage::TripleKey,
    ConnectionArguments, Cursor, Filter, GraphClient, Node, NodeId, PutRequest, QueryTree,
};

fn arb_payload() -> impl Strategy<Value = CursorPayload> {
    prop_oneof![
        Just(CursorPayload::Empty),
        any::<u64>().prop_map(|index| CursorPayload::Indexed { index }),
        ("[A-Za-z0-9:|]{1,12}", "[a-z|]{1,16}", "[A-Za-z0-9:|]{1,12}", "[a-z|]{1,10}").prop_map(
            |(partition, object, subject, predicate)| CursorPayload::HasProp {
                key: TripleKey {
                    partition,
                    object,
                    subject,
                    predicate,
                },
            }
        ),
    ]
}

fn arb_cursor() -> impl Strategy<Value = Cursor> {
    (arb_payload(), prop::collection::vec(arb_payload(), 0..4)).prop_map(|(root, children)| {
        let leaves = children
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Cursor::leaf(format!("{i}.0"), payload));
        Cursor::branch("z", root, leaves)
    })
}

fn seeded(count: usize) -> GraphClient {
    let client = GraphClient::in_memory();
    let mut request = PutRequest::new();
    for i in 0..count {
        let id = NodeId::new("Item", &format!("{i:03}")).expect("valid id");
        request = request.put(Node::new(id).with_prop("rank", (i % 3) as i64));
    }
    client.put(request).expect("seed");
    client
}

proptest! {
    #[test]
    fn cursors_survive_the_wire(cursor in arb_cursor()) {
        let encoded = cursor.encode().unwrap();
        prop_assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        prop_assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn start_cursors_mirror_the_tree(children in 1usize..4) {
        let mut tree = QueryTree::single("z", QueryNode::zip_node_connection());
        for i in 0..children {
            let branch = QueryTree::single(format!("{i}.0"), QueryNode::node_connection("Item"));
            tree = tree.add_sub_tree("z", &branch).unwrap();
        }
        let start = Cursor::start(&tree, "z").unwrap();
        prop_assert_eq!(start.node_count(), children + 1);
        prop_assert!(start.validate(&tree, "z").is_ok());
    }

    #[test]
    fn forward_pages_concatenate_to_the_full_scan(count in 0usize..24, size in 1usize..7) {
        let client = seeded(count);
        let mut seen = Vec::new();
        let mut pages = 0;
        let mut after = None;
        loop {
            let page = client
                .nodes("Item")
                .page(ConnectionArguments::forward(size, after.clone()))
                .get()
                .unwrap();
            pages += 1;
            seen.extend(page.nodes().map(|n| n.id.to_string()));
            if !page.page_info.has_next_page {
                break;
            }
            after = page.page_info.end_cursor.clone();
        }
        let unique: HashSet<&String> = seen.iter().collect();
        prop_assert_eq!(unique.len(), seen.len());
        prop_assert_eq!(seen.len(), count);
        prop_assert_eq!(pages, count.div_ceil(size).max(1));
    }

    #[test]
    fn filtered_pages_match_the_filtered_scan(count in 1usize..24, size in 1usize..5, rank in 0i64..3) {
        let client = seeded(count);
        let expected: Vec<String> = client
            .nodes("Item")
            .page_size(100)
            .get_entities()
            .unwrap()
            .into_iter()
            .filter(|n| n.prop("rank").and_then(|v| v.as_i64()) == Some(rank))
            .map(|n| n.id.to_string())
            .collect();

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = client
                .nodes("Item")
                .filter(Filter::eq("rank", rank))
                .page(ConnectionArguments::forward(size, after.clone()))
                .get()
                .unwrap();
            seen.extend(page.nodes().map(|n| n.id.to_string()));
            if !page.page_info.has_next_page {
                break;
            }
            after = page.page_info.end_cursor.clone();
        }
        prop_assert_eq!(seen, expected);
    }
}
