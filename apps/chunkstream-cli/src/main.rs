use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunkstream_common::ChunkCoord;
use chunkstream_kernel::{ChunkWorld, Material, WorldConfig, decode_chunk};
use chunkstream_persist::{ChunkStore, FileStore};
use chunkstream_stream::{Coordinator, CycleReport, ReadFailurePolicy, StreamConfig};
use clap::{Parser, Subcommand, ValueEnum};
use glam::IVec2;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunkstream-cli", about = "CLI tool for chunk streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Stream a demo world against a file store while walking and painting
    Run {
        /// Store directory
        #[arg(short, long, default_value = "chunks")]
        store: PathBuf,
        /// Terrain seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Cycles to run; 0 runs in the background until Ctrl-C
        #[arg(short, long, default_value = "10")]
        cycles: u64,
        /// Delay between cycles in milliseconds (overrides the config file)
        #[arg(long)]
        period_ms: Option<u64>,
        /// YAML streaming config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Read failure policy (overrides the config file)
        #[arg(long, value_enum)]
        on_read_failure: Option<PolicyArg>,
        /// Edge length of a chunk in cells
        #[arg(long, default_value = "64")]
        chunk_size: usize,
        /// Print cycle reports as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Summarize stored chunks
    Inspect {
        /// Store directory
        #[arg(short, long, default_value = "chunks")]
        store: PathBuf,
        /// Chunk key such as `3_-1`; all chunks when omitted
        key: Option<String>,
        /// Edge length the chunks were saved with
        #[arg(long, default_value = "64")]
        chunk_size: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Retry,
    Regenerate,
}

impl From<PolicyArg> for ReadFailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Retry => ReadFailurePolicy::Retry,
            PolicyArg::Regenerate => ReadFailurePolicy::Regenerate,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Info => {
            println!("chunkstream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", chunkstream_common::crate_info());
            println!("persist: {}", chunkstream_persist::crate_info());
            println!("stream: {}", chunkstream_stream::crate_info());
            let defaults = StreamConfig::default();
            println!(
                "defaults: period={}ms timeout={}ms in_flight={} policy={:?}",
                defaults.cycle_period.as_millis(),
                defaults.store_timeout.as_millis(),
                defaults.max_in_flight,
                defaults.read_failure_policy
            );
        }
        Commands::Run {
            store,
            seed,
            cycles,
            period_ms,
            config,
            on_read_failure,
            chunk_size,
            json,
        } => {
            let mut stream_config = match config {
                Some(path) => StreamConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => StreamConfig::default(),
            };
            if let Some(ms) = period_ms {
                stream_config.cycle_period = Duration::from_millis(ms);
            }
            if let Some(policy) = on_read_failure {
                stream_config.read_failure_policy = policy.into();
            }

            let world = Arc::new(ChunkWorld::new(WorldConfig {
                chunk_size,
                seed,
                ..WorldConfig::default()
            })?);
            let file_store = Arc::new(
                FileStore::open(&store)
                    .await
                    .with_context(|| format!("opening store {}", store.display()))?,
            );
            tracing::info!(store = %store.display(), seed, chunk_size, "starting run");

            let coordinator = Coordinator::new(world.clone(), file_store, stream_config)?;
            if cycles == 0 {
                run_until_interrupted(coordinator, &world).await?;
            } else {
                run_cycles(coordinator, &world, cycles, json).await?;
            }
        }
        Commands::Inspect {
            store,
            key,
            chunk_size,
        } => {
            let file_store = FileStore::open(&store)
                .await
                .with_context(|| format!("opening store {}", store.display()))?;
            let keys = match key {
                Some(key) => vec![key],
                None => file_store.list_keys().await?,
            };
            println!("{} chunk(s) in {}", keys.len(), store.display());
            for key in keys {
                inspect_key(&file_store, &key, chunk_size).await?;
            }
        }
    }

    Ok(())
}

/// Walker position after `step` half-chunk strides east, bobbing up and down.
/// Stops at the edge of the cell grid instead of wrapping.
fn walker_position(step: u64, chunk_size: usize) -> IVec2 {
    let half = i32::try_from(chunk_size / 2).unwrap_or(i32::MAX).max(1);
    let x = i32::try_from(step).unwrap_or(i32::MAX).saturating_mul(half);
    let bob = (step % 3) as i32;
    IVec2::new(x, -bob)
}

/// Advance the demo walker and paint the cell under it.
fn step_walker(world: &ChunkWorld, step: u64) {
    let pos = walker_position(step, world.config().chunk_size);
    world.set_focus(pos);
    match world.write_cell(pos, Material::Water) {
        Ok(_) => {}
        // First visit to a chunk; it is painted once the next cycle loads it.
        Err(e) => tracing::debug!(error = %e, "walker cell not resident yet"),
    }
}

async fn run_cycles(
    mut coordinator: Coordinator,
    world: &ChunkWorld,
    cycles: u64,
    json: bool,
) -> anyhow::Result<()> {
    let period = coordinator.config().cycle_period;
    for step in 0..cycles {
        step_walker(world, step);
        let report = coordinator.run_cycle().await;
        print_report(&report, json)?;
        if step + 1 < cycles {
            tokio::time::sleep(period).await;
        }
    }

    if coordinator.config().flush_on_stop {
        let report = coordinator.flush().await;
        print_report(&report, json)?;
    }

    let totals = coordinator.totals();
    if json {
        println!("{}", serde_json::to_string(totals)?);
    } else {
        println!(
            "Totals: cycles={} loaded={} generated={} saved={} dropped={} failures={} avg={:?} max={:?}",
            totals.cycles,
            totals.loaded,
            totals.generated,
            totals.saved,
            totals.dropped,
            totals.failures,
            coordinator.timer().average(),
            coordinator.timer().max()
        );
    }
    Ok(())
}

async fn run_until_interrupted(coordinator: Coordinator, world: &ChunkWorld) -> anyhow::Result<()> {
    let period = coordinator.config().cycle_period;
    let handle = coordinator.start();
    println!("Streaming until Ctrl-C");

    let mut step = 0;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                break;
            }
            _ = tokio::time::sleep(period) => {
                step_walker(world, step);
                step = step.saturating_add(1);
            }
        }
    }

    let coordinator = handle.stop().await?;
    let totals = coordinator.totals();
    println!(
        "Stopped after {} cycles: saved={} dropped={} failures={}",
        totals.cycles, totals.saved, totals.dropped, totals.failures
    );
    Ok(())
}

fn print_report(report: &CycleReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!(
            "Cycle {}: resident={} loaded={} generated={} saved={} unchanged={} dropped={} retained={} failures={} ({:?})",
            report.cycle,
            report.resident,
            report.loaded,
            report.generated,
            report.saved,
            report.unchanged,
            report.dropped,
            report.retained,
            report.failures(),
            report.elapsed
        );
    }
    Ok(())
}

async fn inspect_key(store: &FileStore, key: &str, chunk_size: usize) -> anyhow::Result<()> {
    let coord = ChunkCoord::from_key(key).with_context(|| format!("bad key {key:?}"))?;
    let Some(blob) = store.get(key).await? else {
        println!("{key}: not stored");
        return Ok(());
    };
    match decode_chunk(&blob, coord, chunk_size) {
        Ok(chunk) => println!(
            "{key}: chunk {coord} revision={} filled={}/{} hash={:#018x} bytes={}",
            chunk.revision(),
            chunk.filled_count(),
            chunk.cells().len(),
            chunk.content_hash(),
            blob.len()
        ),
        Err(e) => println!("{key}: undecodable ({e}), {} bytes", blob.len()),
    }
    Ok(())
}
