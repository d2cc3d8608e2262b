//! Timing helper and the multi-threaded workloads shared by the benchmark
//! binary and the criterion benches.

use std::{
    fmt,
    hint::black_box,
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use rand::{seq::SliceRandom, Rng};
use tracing::info;

use crate::{
    btree::BTree,
    segment::global_page_id,
    slotted_page::{HEADER_SIZE, SLOT_SIZE},
    test_utils::seeded_rng,
    BufferManager, Result, SpSegment, Table, Tid,
};

pub struct BenchResult {
    pub operation: String,
    pub mean: Duration,
    pub median: Duration,
    pub std_dev: Duration,
    pub iterations: usize,
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:20} | {:>10.2?} | {:>10.2?} | {:>10.2?} | {:>8}",
            self.operation, self.mean, self.median, self.std_dev, self.iterations
        )
    }
}

/// Runs `operation` `warmup` times untimed, then `iterations` times timed.
pub fn benchmark<F>(name: &str, iterations: usize, warmup: usize, mut operation: F) -> Result<BenchResult>
where
    F: FnMut() -> Result<()>,
{
    assert!(iterations > 0, "benchmark needs at least one iteration");
    for _ in 0..warmup {
        operation()?;
    }

    let mut durations = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        operation()?;
        durations.push(start.elapsed());
    }

    durations.sort();
    let mean = durations.iter().sum::<Duration>() / iterations as u32;
    let median = if iterations % 2 == 1 {
        durations[iterations / 2]
    } else {
        let mid1 = durations[iterations / 2 - 1].as_nanos();
        let mid2 = durations[iterations / 2].as_nanos();
        Duration::from_nanos(((mid1 + mid2) / 2) as u64)
    };

    let variance: f64 = if iterations > 1 {
        durations
            .iter()
            .map(|d| (d.as_nanos() as f64 - mean.as_nanos() as f64).powi(2))
            .sum::<f64>()
            / (iterations as f64 - 1.0)
    } else {
        0.0
    };
    let std_dev = Duration::from_nanos(variance.sqrt() as u64);

    Ok(BenchResult {
        operation: name.to_string(),
        mean,
        median,
        std_dev,
        iterations,
    })
}

pub fn print_header() {
    println!(
        "{:20} | {:>10} | {:>10} | {:>10} | {:>8}",
        "Operation", "Mean", "Median", "StdDev", "Iters"
    );
    println!("{}", "-".repeat(70));
}

fn join_all(handles: Vec<thread::ScopedJoinHandle<'_, Result<()>>>) -> Result<()> {
    for handle in handles {
        handle
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;
    }
    Ok(())
}

/// Concurrent random page accesses against a small buffer pool.
#[derive(Debug, Clone)]
pub struct BufferWorkload {
    pub page_size: usize,
    pub page_count: usize,
    pub threads: usize,
    pub accesses_per_thread: usize,
    pub segments: u16,
    pub pages_per_segment: u64,
    /// Probability that an access is a read.
    pub read_ratio: f64,
}

impl Default for BufferWorkload {
    fn default() -> Self {
        Self {
            page_size: 1024,
            page_count: 10,
            threads: 10,
            accesses_per_thread: 500,
            segments: 5,
            pages_per_segment: 100,
            read_ratio: 0.7,
        }
    }
}

impl BufferWorkload {
    /// Fixes random pages, retrying whenever the pool is momentarily full.
    pub fn run(&self) -> Result<()> {
        let buffer_manager = BufferManager::temporary(self.page_size, self.page_count)?;
        thread::scope(|scope| {
            let handles = (0..self.threads)
                .map(|worker| {
                    let buffer_manager = &buffer_manager;
                    scope.spawn(move || self.worker(buffer_manager, worker as u64))
                })
                .collect();
            join_all(handles)
        })
    }

    fn worker(&self, buffer_manager: &BufferManager, seed: u64) -> Result<()> {
        let mut rng = seeded_rng(seed);
        for _ in 0..self.accesses_per_thread {
            let segment = rng.gen_range(0..self.segments);
            let page_id = global_page_id(segment, rng.gen_range(0..self.pages_per_segment));
            let exclusive = !rng.gen_bool(self.read_ratio);
            let offset = rng.gen_range(0..self.page_size);
            loop {
                match buffer_manager.fix_page(page_id, exclusive) {
                    Ok(mut page) => {
                        black_box(page.data()[offset]);
                        if exclusive {
                            page.data_mut()[offset] = offset as u8;
                        }
                        buffer_manager.unfix_page(page, exclusive);
                        break;
                    }
                    Err(err) if err.is_retryable() => thread::yield_now(),
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }
}

/// Threads bulk-load disjoint key ranges of one tree, then run a random mix
/// of inserts and erases over the whole key space.
#[derive(Debug, Clone)]
pub struct BTreeWorkload {
    pub page_size: usize,
    pub page_count: usize,
    pub threads: usize,
    /// Keys loaded per thread, in multiples of the leaf capacity.
    pub leaves_per_thread: usize,
    pub mixed_operations: usize,
    pub insert_ratio: f64,
}

impl Default for BTreeWorkload {
    fn default() -> Self {
        Self {
            page_size: 1024,
            page_count: 100,
            threads: 4,
            leaves_per_thread: 16,
            mixed_operations: 1000,
            insert_ratio: 0.9,
        }
    }
}

impl BTreeWorkload {
    pub fn run(&self) -> Result<()> {
        let buffer_manager = Arc::new(BufferManager::temporary(self.page_size, self.page_count)?);
        let tree = BTree::<u64, u64>::new(0, buffer_manager)?;
        let per_thread = (self.leaves_per_thread * tree.leaf_capacity()) as u64;
        let key_space = per_thread * self.threads as u64;
        let barrier = Barrier::new(self.threads);

        thread::scope(|scope| {
            let handles = (0..self.threads as u64)
                .map(|worker| {
                    let (tree, barrier) = (&tree, &barrier);
                    scope.spawn(move || -> Result<()> {
                        let start = worker * per_thread;
                        for key in start..start + per_thread {
                            tree.insert(key, 2 * key)?;
                        }
                        barrier.wait();

                        let mut rng = seeded_rng(worker);
                        for _ in 0..self.mixed_operations {
                            let key = rng.gen_range(0..=key_space);
                            if rng.gen_bool(self.insert_ratio) {
                                tree.insert(key, 0)?;
                            } else {
                                tree.erase(&key)?;
                            }
                        }
                        Ok(())
                    })
                })
                .collect();
            join_all(handles)
        })
    }
}

/// Record churn on a single table: fill, erase half at random, allocate
/// larger records and resize a random subset.
#[derive(Debug, Clone)]
pub struct SlottedWorkload {
    pub page_size: usize,
    pub page_count: usize,
    pub record_size: u32,
    pub seed: u64,
}

impl Default for SlottedWorkload {
    fn default() -> Self {
        Self {
            page_size: 4096,
            page_count: 100,
            record_size: 8,
            seed: 0,
        }
    }
}

impl SlottedWorkload {
    /// Records per batch: ten pages' worth of small records and their TIDs.
    pub fn batch_size(&self) -> usize {
        let per_record = self.record_size as usize + SLOT_SIZE + std::mem::size_of::<Tid>();
        10 * ((self.page_size - HEADER_SIZE) / per_record)
    }

    pub fn run(&self) -> Result<()> {
        let buffer_manager = Arc::new(BufferManager::temporary(self.page_size, self.page_count)?);
        let segment = SpSegment::new(buffer_manager, Table::new("customer", 10, 11))?;
        let batch = self.batch_size();
        let mut rng = seeded_rng(self.seed);

        let mut tids = Vec::with_capacity(2 * batch);
        let mut record = vec![0u8; self.record_size as usize];
        for i in 0..2 * batch {
            record.fill(i as u8);
            let tid = segment.allocate(self.record_size)?;
            segment.write(tid, &record)?;
            tids.push(tid);
        }

        tids.shuffle(&mut rng);
        for tid in tids.drain(..batch) {
            segment.erase(tid)?;
        }

        for _ in 0..batch / 2 {
            let factor = rng.gen_range(2..=16);
            tids.push(segment.allocate(self.record_size * factor)?);
        }

        tids.shuffle(&mut rng);
        for tid in tids.iter().take(batch) {
            let new_size = rng.gen_range(1..=2 * self.record_size);
            segment.resize(*tid, new_size)?;
        }
        info!(
            records = tids.len(),
            pages = segment.fsi().allocated_pages()?,
            "slotted page workload done"
        );
        Ok(())
    }
}
