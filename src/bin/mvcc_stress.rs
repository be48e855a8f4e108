//! Concurrent counter workload exercising conflicts, retries and collection.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use penumbra::storage::{CounterMetrics, GcCfg, Graph, GraphOptions, OptionsFile};
use penumbra::types::{Gid, MvccError, PropId};

const COUNTER: PropId = PropId(1);

#[derive(Parser, Debug)]
#[command(
    name = "mvcc-stress",
    version,
    about = "Hammer the MVCC engine with concurrent read-modify-write transactions"
)]
struct Cli {
    #[arg(long, default_value_t = 4, help = "Writer threads")]
    threads: usize,

    #[arg(long, default_value_t = 8, help = "Counter vertices shared by all writers")]
    counters: usize,

    #[arg(long, default_value_t = 1_000, help = "Committed increments per writer")]
    increments: u64,

    #[arg(long, default_value_t = 0x5eed, env = "PENUMBRA_STRESS_SEED", help = "RNG seed")]
    seed: u64,

    #[arg(long, value_name = "FILE", help = "TOML options file ([gc], [index_build])")]
    config: Option<PathBuf>,

    #[arg(long, help = "Collection interval override in milliseconds")]
    gc_interval_ms: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text, help = "Report format")]
    format: OutputFormat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct Report {
    threads: usize,
    counters: usize,
    committed: u64,
    conflicts: u64,
    final_sum: i64,
    snapshot_reads: u64,
    gc_passes: u64,
    versions_reclaimed: u64,
    elapsed_ms: u128,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if cli.threads == 0 || cli.counters == 0 {
        return Err("threads and counters must be positive".into());
    }

    let mut opts = GraphOptions::new();
    if let Some(path) = &cli.config {
        let text = fs::read_to_string(path)?;
        opts = opts.apply_file(&OptionsFile::from_toml_str(&text)?);
    }
    let gc = GcCfg {
        enabled: true,
        interval_ms: cli.gc_interval_ms.unwrap_or(opts.gc.interval_ms),
    };
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(opts.gc(gc).metrics(metrics.clone()));
    let worker = graph.spawn_gc_worker();

    let gids = seed_counters(&graph, cli.counters)?;
    info!(threads = cli.threads, counters = cli.counters, increments = cli.increments, "stress.start");
    let started = Instant::now();

    let stop = Arc::new(AtomicBool::new(false));
    let auditor = {
        let graph = Arc::clone(&graph);
        let gids = gids.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || audit(&graph, &gids, &stop))
    };

    let writers: Vec<_> = (0..cli.threads)
        .map(|idx| {
            let graph = Arc::clone(&graph);
            let gids = gids.clone();
            let seed = cli.seed.wrapping_add(idx as u64);
            let increments = cli.increments;
            thread::spawn(move || increment_loop(&graph, &gids, seed, increments))
        })
        .collect();

    let mut conflicts = 0;
    for writer in writers {
        conflicts += writer.join().map_err(|_| "writer thread panicked")??;
    }
    stop.store(true, Ordering::Relaxed);
    let snapshot_reads = auditor.join().map_err(|_| "auditor thread panicked")??;
    let gc_passes = worker.as_ref().map_or(0, |worker| worker.passes());
    drop(worker);
    graph.collect_garbage();

    let final_sum = sum(&graph, &gids)?;
    let committed = cli.threads as u64 * cli.increments;
    let report = Report {
        threads: cli.threads,
        counters: cli.counters,
        committed,
        conflicts,
        final_sum,
        snapshot_reads,
        gc_passes,
        versions_reclaimed: CounterMetrics::get(&metrics.versions_reclaimed),
        elapsed_ms: started.elapsed().as_millis(),
    };
    match cli.format {
        OutputFormat::Text => println!(
            "committed={} conflicts={} sum={} reads={} gc_passes={} reclaimed={} elapsed_ms={}",
            report.committed,
            report.conflicts,
            report.final_sum,
            report.snapshot_reads,
            report.gc_passes,
            report.versions_reclaimed,
            report.elapsed_ms
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if i64::try_from(committed).ok() != Some(final_sum) {
        return Err(format!("lost updates: committed {committed}, counters sum to {final_sum}").into());
    }
    Ok(())
}

fn seed_counters(graph: &Arc<Graph>, count: usize) -> penumbra::Result<Vec<Gid>> {
    let dba = graph.access();
    let mut gids = Vec::with_capacity(count);
    for _ in 0..count {
        let vertex = dba.insert_vertex(None)?;
        vertex.set_property(COUNTER, 0i64)?;
        gids.push(vertex.gid());
    }
    dba.commit()?;
    Ok(gids)
}

/// Commits `increments` read-modify-write transactions, retrying each one
/// until it wins. Returns the number of serialization conflicts seen.
fn increment_loop(graph: &Arc<Graph>, gids: &[Gid], seed: u64, increments: u64) -> penumbra::Result<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut conflicts = 0;
    for _ in 0..increments {
        let gid = gids[rng.gen_range(0..gids.len())];
        loop {
            match try_increment(graph, gid) {
                Ok(()) => break,
                Err(err) if err.is_retryable() => {
                    conflicts += 1;
                    debug!(gid = gid.0, "stress.retry");
                    thread::yield_now();
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(conflicts)
}

fn try_increment(graph: &Arc<Graph>, gid: Gid) -> penumbra::Result<()> {
    let dba = graph.access();
    let vertex = dba
        .find_vertex(gid, false)?
        .ok_or(MvccError::EntityNotFound { gid })?;
    let current = vertex.property(COUNTER).and_then(|v| v.as_int()).unwrap_or(0);
    vertex.set_property(COUNTER, current + 1)?;
    dba.commit()
}

/// Repeatedly sums every counter in one snapshot and checks that the total
/// never goes backwards.
fn audit(graph: &Arc<Graph>, gids: &[Gid], stop: &AtomicBool) -> penumbra::Result<u64> {
    let mut last = 0;
    let mut reads = 0;
    while !stop.load(Ordering::Relaxed) {
        let total = sum(graph, gids)?;
        if total < last {
            warn!(total, last, "stress.sum_regressed");
            return Err(MvccError::Invalid("snapshot sum went backwards"));
        }
        last = total;
        reads += 1;
    }
    Ok(reads)
}

fn sum(graph: &Arc<Graph>, gids: &[Gid]) -> penumbra::Result<i64> {
    let dba = graph.access();
    let mut total = 0;
    for gid in gids {
        total += dba
            .find_vertex(*gid, false)?
            .and_then(|v| v.property(COUNTER))
            .and_then(|v| v.as_int())
            .unwrap_or(0);
    }
    dba.commit()?;
    Ok(total)
}
