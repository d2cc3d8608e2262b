use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagestore::{
    benchmark_framework::BTreeWorkload, test_utils::shuffled_keys, BTree, BufferManager,
};

const PAGE_SIZE: usize = 1024;

fn new_tree() -> BTree<u64, u64> {
    let bm = Arc::new(BufferManager::temporary(PAGE_SIZE, 100).unwrap());
    BTree::new(0, bm).unwrap()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");
    group.sample_size(20);

    for count in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter_with_setup(new_tree, |tree| {
                for key in 0..count {
                    tree.insert(key, 2 * key).unwrap();
                }
                tree
            })
        });
        group.bench_with_input(BenchmarkId::new("random", count), &count, |b, &count| {
            b.iter_with_setup(
                || (new_tree(), shuffled_keys(count, 0)),
                |(tree, keys)| {
                    for key in keys {
                        tree.insert(key, 2 * key).unwrap();
                    }
                    tree
                },
            )
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_lookup");
    let count = 10_000u64;
    let tree = new_tree();
    for key in shuffled_keys(count, 1) {
        tree.insert(key, key).unwrap();
    }
    let probes = shuffled_keys(count, 2);

    group.throughput(Throughput::Elements(count));
    group.bench_function("existing_keys", |b| {
        b.iter(|| {
            for key in &probes {
                black_box(tree.lookup(black_box(key)).unwrap());
            }
        })
    });
    group.bench_function("missing_keys", |b| {
        b.iter(|| {
            for key in &probes {
                black_box(tree.lookup(&(key + count)).unwrap());
            }
        })
    });
    group.finish();
}

fn bench_erase(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_erase");
    group.sample_size(20);
    let count = 5_000u64;
    group.throughput(Throughput::Elements(count));
    group.bench_function("random", |b| {
        b.iter_with_setup(
            || {
                let tree = new_tree();
                for key in 0..count {
                    tree.insert(key, key).unwrap();
                }
                (tree, shuffled_keys(count, 3))
            },
            |(tree, keys)| {
                for key in &keys {
                    tree.erase(key).unwrap();
                }
                tree
            },
        )
    });
    group.finish();
}

fn bench_multi_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_multi");
    group.sample_size(10);
    let workload = BTreeWorkload::default();
    group.bench_function("load_then_mixed", |b| b.iter(|| workload.run().unwrap()));
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_erase, bench_multi_threaded);
criterion_main!(benches);
