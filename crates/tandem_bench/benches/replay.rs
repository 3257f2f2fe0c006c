//! Replay benchmarks against the in-memory target.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tandem_model::{ChangeSet, Operation, Snapshotter};
use tandem_testkit::{employee, TestHarness};

fn batch(harness: &TestHarness, size: usize, operation: Operation) -> ChangeSet {
    let snapshotter = Snapshotter::new(Arc::clone(&harness.registry));
    ChangeSet::from_snapshots(
        (0..size as i64)
            .filter_map(|id| snapshotter.snapshot(&employee(id, "Bench"), operation).ok()),
    )
}

/// Benchmark replaying fresh inserts and conflicting inserts.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));

        let harness = TestHarness::new();
        let inserts = batch(&harness, size, Operation::Insert);
        let deletes = batch(&harness, size, Operation::Delete);
        group.bench_with_input(BenchmarkId::new("insert_delete", size), &size, |b, _| {
            b.iter(|| {
                black_box(harness.replicator.replicate(inserts.clone()));
                black_box(harness.replicator.replicate(deletes.clone()));
            });
        });

        let harness = TestHarness::new();
        let upserts = batch(&harness, size, Operation::Insert);
        harness.replicator.replicate(upserts.clone());
        group.bench_with_input(BenchmarkId::new("insert_conflict", size), &size, |b, _| {
            b.iter(|| black_box(harness.replicator.replicate(upserts.clone())));
        });
    }

    group.finish();
}

/// Benchmark a full commit through the primary store.
fn bench_commit(c: &mut Criterion) {
    let harness = TestHarness::new();
    let mut next = 0i64;

    c.bench_function("commit/ten_inserts", |b| {
        b.iter(|| {
            let mut tx = harness.primary.begin();
            for _ in 0..10 {
                tx.insert(employee(next, "Bench"));
                next += 1;
            }
            black_box(tx.commit())
        });
    });
}

criterion_group!(benches, bench_replay, bench_commit);
criterion_main!(benches);
