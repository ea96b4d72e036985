#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata::{ConnectionArguments, Edge, Filter, GraphClient, Node, NodeId, PutRequest};

const USER_COUNT: usize = 2_048;
const FOLLOWS_PER_USER: usize = 8;

fn seeded() -> GraphClient {
    let client = GraphClient::in_memory();
    let id = |i: usize| NodeId::new("User", &format!("{i:05}")).expect("id");
    let mut nodes = PutRequest::new();
    for i in 0..USER_COUNT {
        nodes = nodes.put(Node::new(id(i)).with_prop("score", (i % 100) as i64));
    }
    client.put(nodes).expect("seed nodes");

    let mut rng = StdRng::seed_from_u64(7);
    let mut edges = PutRequest::new().without_node_edge_checks();
    for i in 0..USER_COUNT {
        for _ in 0..FOLLOWS_PER_USER {
            let target = rng.gen_range(0..USER_COUNT);
            edges = edges.put(Edge::new("Follows", id(target), id(i)));
        }
    }
    client.put(edges).expect("seed edges");
    client
}

fn walk_pages(client: &GraphClient, size: usize, filter: Option<Filter>) -> usize {
    let mut seen = 0;
    let mut after = None;
    loop {
        let mut query = client
            .nodes("User")
            .page(ConnectionArguments::forward(size, after.take()));
        if let Some(filter) = filter.clone() {
            query = query.filter(filter);
        }
        let page = query.get().expect("page");
        seen += page.len();
        if !page.page_info.has_next_page {
            return seen;
        }
        after = page.page_info.end_cursor;
    }
}

fn paging(c: &mut Criterion) {
    let client = seeded();
    let mut group = c.benchmark_group("paging/type_scan");
    group.sample_size(20);
    group.throughput(Throughput::Elements(USER_COUNT as u64));
    for size in [25, 100, 500] {
        group.bench_with_input(BenchmarkId::new("unfiltered", size), &size, |b, size| {
            b.iter(|| black_box(walk_pages(&client, *size, None)));
        });
        group.bench_with_input(BenchmarkId::new("filtered", size), &size, |b, size| {
            b.iter(|| black_box(walk_pages(&client, *size, Some(Filter::lt("score", 10)))));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("paging/hop");
    group.sample_size(20);
    group.bench_function("followed_users", |b| {
        b.iter(|| {
            black_box(
                client
                    .nodes("User")
                    .out_edges("Follows")
                    .in_nodes()
                    .page_size(100)
                    .get()
                    .expect("hop page")
                    .len(),
            )
        });
    });
    group.finish();
}

criterion_group!(benches, paging);
criterion_main!(benches);
