//! raidrecon
//!
//! Simulates rebuilding a failed column of a parity-protected RAID row and
//! reports what the reconstruction pool and disk queues did.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           raidrecon                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Disk Queue  │───▶│ Recon Buffer │───▶│  Write-back  │       │
//! │  │ (per column) │    │     Pool     │    │  (replacement│       │
//! │  │              │    │   (per row)  │    │     disk)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use raidrecon::error::{Error, Result};
use raidrecon::{QueueDiscipline, SimulationConfig, Simulator};

// =============================================================================
// CLI Arguments
// =============================================================================

/// raidrecon - simulate parity reconstruction of a failed RAID column
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML simulation config; flags below override its values
    #[arg(long, env = "RAIDRECON_CONFIG")]
    config: Option<PathBuf>,

    /// Columns in the row, including the failed one
    #[arg(long, env = "RAIDRECON_COLUMNS")]
    columns: Option<usize>,

    /// Contributions needed to rebuild one RU (defaults to columns - 1)
    #[arg(long, env = "RAIDRECON_DATA_COLUMNS")]
    data_columns: Option<usize>,

    /// Column to fail and rebuild
    #[arg(long, env = "RAIDRECON_FAILED_COLUMN")]
    failed_column: Option<usize>,

    /// Parity stripes in the row
    #[arg(long, env = "RAIDRECON_STRIPES")]
    stripes: Option<u64>,

    /// Floating reconstruction buffers in the pool
    #[arg(long, env = "RAIDRECON_FLOATING_BUFFERS")]
    floating_buffers: Option<usize>,

    /// Queued buffers that trigger an XOR
    #[arg(long, env = "RAIDRECON_ACCUMULATE_THRESHOLD")]
    accumulate_threshold: Option<usize>,

    /// Disk queue discipline (sstf, scan, cscan, fifo)
    #[arg(long, env = "RAIDRECON_DISCIPLINE")]
    discipline: Option<String>,

    /// RUs a worker may run ahead of the slowest (0 = unlimited)
    #[arg(long, env = "RAIDRECON_HEAD_SEPARATION")]
    head_separation: Option<u64>,

    /// Foreground reads per disk for every reconstruction read
    #[arg(long, env = "RAIDRECON_FOREGROUND_PER_RU")]
    foreground_per_ru: Option<usize>,

    /// Stripe to rebuild through the forced path (repeatable)
    #[arg(long = "force-stripe")]
    force_stripes: Vec<u64>,

    /// Simulated latency per disk operation, in microseconds
    #[arg(long, env = "RAIDRECON_DISK_LATENCY_US")]
    disk_latency_us: Option<u64>,

    /// Seed for generated data
    #[arg(long, env = "RAIDRECON_SEED")]
    seed: Option<u64>,

    /// Print pool metrics in Prometheus text format when done
    #[arg(long, env = "RAIDRECON_DUMP_METRICS")]
    dump_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = build_config(&args)?;
    config.validate()?;

    info!("Starting raidrecon");
    info!(
        "  Geometry: {} columns, {} data, {} byte RUs",
        config.geometry.num_columns,
        config.geometry.num_data_columns,
        config.geometry.ru_bytes()
    );
    info!(
        "  Pool: {} floating buffers, accumulate threshold {}",
        config.pool.floating_buffers, config.pool.accumulate_threshold
    );
    info!("  Disk queues: {}", config.queue.discipline);
    info!(
        "  Failed column: {} of {} stripes",
        config.failed_column, config.stripes
    );

    let registry = Registry::new();
    let simulator = Simulator::new(config)?;
    let report = simulator.run(Some(&registry)).await.map_err(|e| {
        error!("Reconstruction failed: {}", e);
        e
    })?;

    print!("{}", serde_yaml::to_string(&report)?);

    if args.dump_metrics {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buf)?;
        let text = String::from_utf8(buf)
            .map_err(|e| Error::Internal(format!("metrics are not UTF-8: {}", e)))?;
        print!("{}", text);
    }

    info!("raidrecon finished");
    Ok(())
}

/// Defaults, then the YAML file, then flags.
fn build_config(args: &Args) -> Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_yaml_file(path)?,
        None => SimulationConfig::default(),
    };

    if let Some(columns) = args.columns {
        config.geometry.num_columns = columns;
        config.geometry.num_data_columns = columns.saturating_sub(1);
        config.failed_column = columns.saturating_sub(1);
    }
    if let Some(data_columns) = args.data_columns {
        config.geometry.num_data_columns = data_columns;
    }
    if let Some(failed_column) = args.failed_column {
        config.failed_column = failed_column;
    }
    if let Some(stripes) = args.stripes {
        config.stripes = stripes;
    }
    if let Some(floating_buffers) = args.floating_buffers {
        config.pool.floating_buffers = floating_buffers;
    }
    if let Some(threshold) = args.accumulate_threshold {
        config.pool.accumulate_threshold = threshold;
    }
    if let Some(discipline) = &args.discipline {
        config.queue.discipline = discipline.parse::<QueueDiscipline>()?;
    }
    if let Some(limit) = args.head_separation {
        config.head_separation_limit = limit;
    }
    if let Some(per_ru) = args.foreground_per_ru {
        config.foreground_per_ru = per_ru;
    }
    if !args.force_stripes.is_empty() {
        config.forced_stripes = args.force_stripes.clone();
    }
    if let Some(latency) = args.disk_latency_us {
        config.disk_latency_us = latency;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so the report on stdout stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
