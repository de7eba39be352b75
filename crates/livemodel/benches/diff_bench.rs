//! Benchmarks for list diffing and minimal-edit application.
//!
//! Run with: cargo bench -p livemodel --bench diff_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use livemodel::{ObservableList, diff, update_array};
use std::hint::black_box;

const SIZES: [usize; 3] = [32, 256, 2048];

/// Deterministic shuffle. `len` is a power of two, so an odd stride visits
/// every index once.
fn strided(len: usize) -> Vec<u32> {
    (0..len).map(|i| ((i * 7 + 3) % len) as u32).collect()
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff/plan");

    for len in SIZES {
        group.throughput(Throughput::Elements(len as u64));
        let current: Vec<u32> = (0..len as u32).collect();

        let identical = current.clone();
        group.bench_with_input(BenchmarkId::new("identical", len), &(), |b, _| {
            b.iter(|| black_box(diff(&current, &identical)))
        });

        let shuffled = strided(len);
        group.bench_with_input(BenchmarkId::new("shuffled", len), &(), |b, _| {
            b.iter(|| black_box(diff(&current, &shuffled)))
        });

        let churned: Vec<u32> = current
            .iter()
            .filter(|n| *n % 3 != 0)
            .copied()
            .chain(len as u32..len as u32 + len as u32 / 3)
            .collect();
        group.bench_with_input(BenchmarkId::new("churn_33pct", len), &(), |b, _| {
            b.iter(|| black_box(diff(&current, &churned)))
        });
    }

    group.finish();
}

fn bench_update_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff/update_array");

    for len in SIZES {
        group.throughput(Throughput::Elements(len as u64));
        let current: Vec<u32> = (0..len as u32).collect();
        let shuffled = strided(len);

        group.bench_with_input(BenchmarkId::new("shuffle_and_back", len), &(), |b, _| {
            let list = ObservableList::new(current.clone());
            let _sub = list.subscribe(|change| {
                black_box(change.changes.len());
                Ok(())
            });
            b.iter(|| {
                black_box(update_array(&list, &shuffled).ok());
                black_box(update_array(&list, &current).ok());
            })
        });

        let appended: Vec<u32> = (0..len as u32 + 8).collect();
        group.bench_with_input(BenchmarkId::new("append_and_trim", len), &(), |b, _| {
            let list = ObservableList::new(current.clone());
            b.iter(|| {
                black_box(update_array(&list, &appended).ok());
                black_box(update_array(&list, &current).ok());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan, bench_update_array);
criterion_main!(benches);
