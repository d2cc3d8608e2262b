use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagestore::{benchmark_framework::SlottedWorkload, SlottedPage};

const PAGE_SIZE: usize = 4096;

fn filled_page(record_size: u32) -> (Vec<u8>, Vec<u16>) {
    let mut buf = vec![0u8; PAGE_SIZE];
    let mut page = SlottedPage::init(&mut buf[..]);
    let mut slots = Vec::new();
    while let Ok(slot) = page.allocate(record_size) {
        page.record_mut(slot).fill(slot as u8);
        slots.push(slot);
    }
    (buf, slots)
}

fn bench_page_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("slotted_page");

    for record_size in [8u32, 64, 256] {
        let (_, slots) = filled_page(record_size);
        group.throughput(Throughput::Elements(slots.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("fill", record_size),
            &record_size,
            |b, &record_size| b.iter(|| black_box(filled_page(record_size))),
        );
        group.bench_with_input(
            BenchmarkId::new("compactify", record_size),
            &record_size,
            |b, &record_size| {
                b.iter_with_setup(
                    || {
                        let (mut buf, slots) = filled_page(record_size);
                        let mut page = SlottedPage::new(&mut buf[..]);
                        for slot in slots.iter().step_by(2) {
                            page.erase(*slot);
                        }
                        buf
                    },
                    |mut buf| {
                        SlottedPage::new(&mut buf[..]).compactify();
                        buf
                    },
                )
            },
        );
    }
    group.finish();
}

fn bench_segment_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("sp_segment");
    group.sample_size(10);
    let workload = SlottedWorkload::default();
    group.throughput(Throughput::Elements(workload.batch_size() as u64));
    group.bench_function("churn", |b| b.iter(|| workload.run().unwrap()));
    group.finish();
}

criterion_group!(benches, bench_page_operations, bench_segment_workload);
criterion_main!(benches);
