use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagestore::{
    benchmark_framework::BufferWorkload, segment::global_page_id, BufferManager, PageIo,
    StorageConfig,
};

const PAGE_SIZE: usize = 1024;

fn bench_fix_hit(c: &mut Criterion) {
    let bm = BufferManager::temporary(PAGE_SIZE, 16).unwrap();
    let page_id = global_page_id(1, 0);
    drop(bm.fix_page(page_id, true).unwrap());

    let mut group = c.benchmark_group("buffer_fix");
    group.bench_function("shared_hit", |b| {
        b.iter(|| {
            let page = bm.fix_page(black_box(page_id), false).unwrap();
            black_box(page.data()[0]);
        })
    });
    group.bench_function("exclusive_hit", |b| {
        b.iter(|| {
            let page = bm.fix_page(black_box(page_id), true).unwrap();
            bm.unfix_page(page, true);
        })
    });
    group.finish();
}

fn bench_access_patterns(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_access");
    let frames = 32;

    for working_set in [16u64, 64, 256] {
        group.throughput(Throughput::Elements(working_set));
        group.bench_with_input(
            BenchmarkId::new("sequential_scan", working_set),
            &working_set,
            |b, &working_set| {
                let page_io = Arc::new(PageIo::new(&StorageConfig::new(PAGE_SIZE, frames)).unwrap());
                let bm = BufferManager::new(PAGE_SIZE, frames, page_io).unwrap();
                b.iter(|| {
                    for page in 0..working_set {
                        let page = bm.fix_page(global_page_id(2, page), false).unwrap();
                        black_box(page.data()[0]);
                    }
                })
            },
        );
    }
    group.finish();
}

fn bench_multi_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_multi");
    group.sample_size(10);
    for threads in [1usize, 4, 10] {
        let workload = BufferWorkload {
            threads,
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("threads", threads), &workload, |b, workload| {
            b.iter(|| workload.run().unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fix_hit, bench_access_patterns, bench_multi_threaded);
criterion_main!(benches);
