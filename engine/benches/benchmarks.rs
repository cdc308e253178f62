//! Performance benchmarks for outbox-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use outbox_engine::{
    conflict, ConflictPolicy, DependencyGraph, NewOperation, Operation, OperationPatch, Payload,
    QueueDomain, RemoteState, VectorClock,
};
use serde_json::json;

fn clock_with_nodes(nodes: usize, offset: u64) -> VectorClock {
    VectorClock::from_entries((0..nodes).map(|i| (format!("node-{i}"), i as u64 + offset)))
}

fn test_operation(policy: ConflictPolicy, clock: VectorClock) -> Operation {
    NewOperation::new(
        "board-1",
        "item-1",
        Payload::Patch {
            changes: json!({"title": "Test item", "labels": ["a", "b", "c"], "estimate": 5})
                .as_object()
                .cloned()
                .unwrap(),
        },
    )
    .with_policy(policy)
    .into_operation(QueueDomain::Item, "op-1".into(), 1000, clock)
}

fn bench_vector_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_clock");

    group.bench_function("increment", |b| {
        let clock = clock_with_nodes(8, 0);
        b.iter(|| black_box(&clock).increment(black_box("node-3")))
    });

    for nodes in [2, 16, 128] {
        let a = clock_with_nodes(nodes, 0);
        let b_clock = clock_with_nodes(nodes, 1);

        group.bench_with_input(BenchmarkId::new("merge", nodes), &nodes, |b, _| {
            b.iter(|| black_box(&a).merge(black_box(&b_clock)))
        });

        group.bench_with_input(BenchmarkId::new("compare", nodes), &nodes, |b, _| {
            b.iter(|| black_box(&a).compare(black_box(&b_clock)))
        });
    }

    group.finish();
}

fn bench_conflict_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_resolution");

    let local = VectorClock::from_entries([("device-1", 5), ("server", 2)]);
    let remote = RemoteState::new(
        json!({"title": "Remote", "labels": ["c", "d"], "estimate": 3}),
        VectorClock::from_entries([("device-1", 4), ("server", 3)]),
    );

    let policies = [
        ("last_writer_wins", ConflictPolicy::last_writer_wins()),
        ("set_union", ConflictPolicy::set_union("labels")),
        ("set_intersection", ConflictPolicy::set_intersection("labels")),
        ("numeric_sum", ConflictPolicy::numeric_sum("estimate")),
    ];
    for (name, policy) in policies {
        let op = test_operation(policy, local.clone());
        group.bench_function(name, |b| {
            b.iter(|| conflict::resolve(black_box(&op), black_box(&remote)))
        });
    }

    group.finish();
}

fn bench_dependency_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_graph");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("register_chain", size), &size, |b, &size| {
            b.iter(|| {
                let mut graph = DependencyGraph::new();
                for i in 1..size {
                    graph.register(&format!("op-{i}"), &[format!("op-{}", i - 1)], 1000);
                }
                graph
            })
        });

        let mut graph = DependencyGraph::new();
        let ids: Vec<String> = (0..size).map(|i| format!("op-{i}")).collect();
        graph.register("target", &ids, 1000);
        for id in &ids {
            graph.resolve(id, 1000);
        }
        group.bench_with_input(BenchmarkId::new("is_satisfied", size), &size, |b, _| {
            b.iter(|| graph.is_satisfied(black_box(&ids)))
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let op = test_operation(
        ConflictPolicy::numeric_sum("estimate"),
        clock_with_nodes(4, 1),
    );
    group.bench_function("operation_to_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&op)))
    });

    let json = serde_json::to_string(&op).unwrap();
    group.bench_function("operation_from_json", |b| {
        b.iter(|| serde_json::from_str::<Operation>(black_box(&json)))
    });

    group.bench_function("apply_patch", |b| {
        b.iter(|| OperationPatch::begin_attempt(black_box(&op), 2000).apply(black_box(&op)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_vector_clock,
    bench_conflict_resolution,
    bench_dependency_graph,
    bench_serialization,
);
criterion_main!(benches);
