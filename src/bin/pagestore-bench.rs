//! Runs the storage workloads and prints timing statistics.
//!
//! ```text
//! pagestore-bench --iterations 20 buffer --frames 10 --threads 10
//! RUST_LOG=pagestore=debug pagestore-bench btree
//! ```

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pagestore::{
    benchmark_framework::{
        benchmark, print_header, BTreeWorkload, BenchResult, BufferWorkload, SlottedWorkload,
    },
    Result,
};

#[derive(Parser, Debug)]
#[command(name = "pagestore-bench", version, about = "Storage core workloads")]
struct Args {
    /// Timed runs per workload
    #[arg(short, long, default_value_t = 10)]
    iterations: usize,

    /// Untimed runs before measuring
    #[arg(short, long, default_value_t = 1)]
    warmup: usize,

    #[command(subcommand)]
    workload: Option<Workload>,
}

#[derive(Subcommand, Debug)]
enum Workload {
    /// Random concurrent page fixes against a small pool
    Buffer {
        #[arg(long, default_value_t = 10)]
        frames: usize,
        #[arg(long, default_value_t = 10)]
        threads: usize,
        #[arg(long, default_value_t = 500)]
        accesses: usize,
    },
    /// Concurrent B+Tree loads followed by mixed inserts and erases
    Btree {
        #[arg(long, default_value_t = 100)]
        frames: usize,
        #[arg(long, default_value_t = 4)]
        threads: usize,
    },
    /// Record allocation, erase and resize churn
    Slotted {
        #[arg(long, default_value_t = 4096)]
        page_size: usize,
    },
    /// Every workload with default settings
    All,
}

fn run(args: &Args, workload: &Workload) -> Result<Vec<BenchResult>> {
    let (iterations, warmup) = (args.iterations, args.warmup);
    let results = match workload {
        Workload::Buffer {
            frames,
            threads,
            accesses,
        } => {
            let workload = BufferWorkload {
                page_count: *frames,
                threads: *threads,
                accesses_per_thread: *accesses,
                ..Default::default()
            };
            vec![benchmark("Buffer (multi)", iterations, warmup, || workload.run())?]
        }
        Workload::Btree { frames, threads } => {
            let workload = BTreeWorkload {
                page_count: *frames,
                threads: *threads,
                ..Default::default()
            };
            vec![benchmark("B+Tree (multi)", iterations, warmup, || workload.run())?]
        }
        Workload::Slotted { page_size } => {
            let workload = SlottedWorkload {
                page_size: *page_size,
                ..Default::default()
            };
            vec![benchmark("Slotted pages", iterations, warmup, || workload.run())?]
        }
        Workload::All => {
            let buffer = BufferWorkload::default();
            let btree = BTreeWorkload::default();
            let slotted = SlottedWorkload::default();
            vec![
                benchmark("Buffer (multi)", iterations, warmup, || buffer.run())?,
                benchmark("B+Tree (multi)", iterations, warmup, || btree.run())?,
                benchmark("Slotted pages", iterations, warmup, || slotted.run())?,
            ]
        }
    };
    Ok(results)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    if args.iterations == 0 {
        return Err(pagestore::Error::config("--iterations must be at least 1"));
    }
    let workload = args.workload.as_ref().unwrap_or(&Workload::All);

    println!("pagestore-bench: {workload:?}");
    print_header();
    for result in run(&args, workload)? {
        println!("{result}");
    }
    Ok(())
}
