//! Reconstruction Simulator
//!
//! Drives a full rebuild of one failed column against an in-memory disk
//! array, end to end through the disk queues and the buffer pool.
//!
//! # Workflow
//!
//! ```text
//!  ┌──────────────┐   low-priority read   ┌────────────┐   read    ┌──────────┐
//!  │ worker col c │──────────────────────▶│ DiskQueue  │──────────▶│  disks   │
//!  └──────┬───────┘  (+ foreground reads) │  (sstf…)   │           └──────────┘
//!         │ submit                        └────────────┘                ▲
//!         ▼                                                             │ write
//!  ┌──────────────────┐  full batch  ┌──────────────────┐               │
//!  │ ReconBufferPool  │─────────────▶│ write-back task  │───────────────┘
//!  └──────────────────┘              │ verify vs golden │
//!                                    └──────────────────┘
//! ```
//!
//! Each parity stripe holds one RU. Stripe `s` spans `num_data_columns + 1`
//! consecutive columns starting at `s % num_columns`, so with
//! `num_data_columns == num_columns - 1` every stripe covers the whole row.

pub mod config;
pub mod head_sep;

pub use config::SimulationConfig;
pub use head_sep::HeadSeparation;

use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::Registry;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::adapters::MemoryDiskArray;
use crate::disk_queue::{DiskQueueEntry, DiskRequestQueue};
use crate::domain::ports::{ColumnState, DiskBackend};
use crate::error::{Error, Result};
use crate::recon::xor::xor_into;
use crate::recon::{BufferType, ReconBuffer, ReconBufferPool, ReconGeometry, RuKey, SubmitOutcome};

// =============================================================================
// Layout
// =============================================================================

/// Columns holding stripe `stripe_id`; the last one holds its parity.
pub fn stripe_columns(geometry: &ReconGeometry, stripe_id: u64) -> Vec<usize> {
    let start = (stripe_id % geometry.num_columns as u64) as usize;
    (0..=geometry.num_data_columns)
        .map(|j| (start + j) % geometry.num_columns)
        .collect()
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Deterministic contents of one stripe unit.
fn unit_pattern(seed: u64, stripe_id: u64, column: usize, len: usize) -> Vec<u8> {
    let mut state = seed ^ (stripe_id << 16) ^ column as u64;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        out.extend_from_slice(&splitmix64(&mut state).to_le_bytes());
    }
    out.truncate(len);
    out
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of a simulated rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimReport {
    pub rebuilt_units: usize,
    pub forced_units: usize,
    pub bytes_rebuilt: u64,
    pub recon_reads: u64,
    pub foreground_reads: u64,
    pub buffer_waits: u64,
    pub promoted_requests: u64,
    pub write_back_batches: usize,
    pub largest_batch: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct WorkerReport {
    recon_reads: u64,
    foreground_reads: u64,
    buffer_waits: u64,
}

#[derive(Debug, Default)]
struct WriteBackReport {
    rebuilt_units: usize,
    forced_units: usize,
    bytes: u64,
    batches: usize,
    largest_batch: usize,
}

#[derive(Debug)]
enum TaskReport {
    Worker(WorkerReport),
    WriteBack(WriteBackReport),
}

/// Payload of a queued disk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimRequest {
    Recon,
    Foreground,
}

// =============================================================================
// Simulator
// =============================================================================

struct SimContext {
    config: SimulationConfig,
    pool: ReconBufferPool,
    disks: Arc<dyn DiskBackend>,
    queues: Vec<Option<DiskRequestQueue<SimRequest>>>,
    heads: HeadSeparation,
}

/// Simulated rebuild of one column of a parity-protected row.
pub struct Simulator {
    config: SimulationConfig,
    disks: Arc<MemoryDiskArray>,
}

impl Simulator {
    /// Build the disk array and fill every stripe with data and parity.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let geometry = &config.geometry;
        let mut disks = MemoryDiskArray::new(
            geometry.num_columns,
            config.sectors_per_column(),
            geometry.bytes_per_sector,
        );
        if config.disk_latency_us > 0 {
            disks = disks.with_latency(Duration::from_micros(config.disk_latency_us));
        }

        let ru_bytes = geometry.ru_bytes();
        for stripe_id in 0..config.stripes {
            let columns = stripe_columns(geometry, stripe_id);
            let sector = stripe_id * geometry.sectors_per_ru();
            let mut parity = vec![0u8; ru_bytes];
            for &column in &columns[..geometry.num_data_columns] {
                let unit = unit_pattern(config.seed, stripe_id, column, ru_bytes);
                xor_into(&mut parity, &[&unit]);
                disks.fill(column, sector, &unit)?;
            }
            disks.fill(columns[geometry.num_data_columns], sector, &parity)?;
        }

        info!(
            "Simulated row {}: {} columns, {} stripes of {} bytes",
            config.row, geometry.num_columns, config.stripes, ru_bytes
        );
        Ok(Self {
            config,
            disks: Arc::new(disks),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn disks(&self) -> &Arc<MemoryDiskArray> {
        &self.disks
    }

    /// Fail the configured column, rebuild it onto a replacement disk and
    /// verify the result. Pool metrics go to `registry` when given.
    #[instrument(skip(self, registry), fields(row = self.config.row, failed = self.config.failed_column))]
    pub async fn run(&self, registry: Option<&Registry>) -> Result<SimReport> {
        let start = Instant::now();
        let config = &self.config;
        let geometry = &config.geometry;
        let failed = config.failed_column;

        let golden = self.disks.snapshot(failed)?;
        self.disks.fail_column(failed)?;
        self.disks.replace_column(failed)?;

        let pool = ReconBufferPool::new(config.row, failed, geometry.clone(), config.pool.clone())?;
        if let Some(registry) = registry {
            pool.metrics().register(registry)?;
        }

        let affected: Vec<u64> = (0..config.stripes)
            .filter(|&s| stripe_columns(geometry, s).contains(&failed))
            .collect();
        let workers: Vec<usize> = (0..geometry.num_columns).filter(|&c| c != failed).collect();

        let mut queues = Vec::with_capacity(geometry.num_columns);
        for column in 0..geometry.num_columns {
            queues.push(if column == failed {
                None
            } else {
                Some(DiskRequestQueue::new(column, &config.queue)?)
            });
        }

        let heads = HeadSeparation::new(
            geometry.num_columns,
            &workers,
            config.head_separation_limit,
            pool.stall_counter(),
        );
        let ctx = Arc::new(SimContext {
            config: config.clone(),
            pool,
            disks: self.disks.clone(),
            queues,
            heads,
        });

        info!(
            "Rebuilding column {} ({} RUs) with {} workers",
            failed,
            affected.len(),
            workers.len()
        );

        let mut tasks = JoinSet::new();
        for &column in &workers {
            let stripes: Vec<u64> = affected
                .iter()
                .copied()
                .filter(|&s| stripe_columns(geometry, s).contains(&column))
                .collect();
            let ctx = ctx.clone();
            tasks.spawn(async move { run_worker(ctx, column, stripes).await.map(TaskReport::Worker) });
        }
        {
            let ctx = ctx.clone();
            let expected = affected.len();
            tasks.spawn(async move {
                run_write_back(ctx, expected, golden)
                    .await
                    .map(TaskReport::WriteBack)
            });
        }

        let mut report = SimReport::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!("Simulation aborted: {}", e);
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(Error::Internal(format!("simulation task failed: {}", e)));
                }
            };
            match outcome {
                TaskReport::Worker(w) => {
                    report.recon_reads += w.recon_reads;
                    report.foreground_reads += w.foreground_reads;
                    report.buffer_waits += w.buffer_waits;
                }
                TaskReport::WriteBack(wb) => {
                    report.rebuilt_units = wb.rebuilt_units;
                    report.forced_units = wb.forced_units;
                    report.bytes_rebuilt = wb.bytes;
                    report.write_back_batches = wb.batches;
                    report.largest_batch = wb.largest_batch;
                }
            }
        }

        report.promoted_requests = ctx
            .queues
            .iter()
            .flatten()
            .map(|q| q.stats().promoted)
            .sum();

        ctx.pool.verify_invariants();
        if !ctx.pool.is_idle() {
            ctx.pool.log_status_table();
            return Err(Error::Internal(
                "reconstruction finished with work still in the pool".into(),
            ));
        }

        self.verify_rebuilt_column(&self.disks.snapshot(failed)?)?;
        self.disks.set_state(failed, ColumnState::Optimal)?;

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Column {} rebuilt: {} RUs in {} write-back batches, {} buffer waits, {}ms",
            failed,
            report.rebuilt_units,
            report.write_back_batches,
            report.buffer_waits,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Compare the replacement disk with the data parity implies.
    fn verify_rebuilt_column(&self, rebuilt: &[u8]) -> Result<()> {
        let geometry = &self.config.geometry;
        let ru_bytes = geometry.ru_bytes();
        for stripe_id in 0..self.config.stripes {
            let columns = stripe_columns(geometry, stripe_id);
            let Some(position) = columns.iter().position(|&c| c == self.config.failed_column)
            else {
                continue;
            };

            let mut expected = vec![0u8; ru_bytes];
            if position < geometry.num_data_columns {
                expected = unit_pattern(self.config.seed, stripe_id, columns[position], ru_bytes);
            } else {
                for &column in &columns[..geometry.num_data_columns] {
                    let unit = unit_pattern(self.config.seed, stripe_id, column, ru_bytes);
                    xor_into(&mut expected, &[&unit]);
                }
            }

            let start = stripe_id as usize * ru_bytes;
            if rebuilt[start..start + ru_bytes] != expected[..] {
                return Err(Error::Verification {
                    stripe_id,
                    ru: 0,
                    reason: "replacement disk contents differ from parity".into(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Per-column reconstruction loop: one low-priority read in flight at a
/// time, foreground reads competing in the same queue.
#[instrument(skip(ctx, stripes), fields(rus = stripes.len()))]
async fn run_worker(ctx: Arc<SimContext>, column: usize, stripes: Vec<u64>) -> Result<WorkerReport> {
    let config = &ctx.config;
    let geometry = &config.geometry;
    let sectors_per_ru = geometry.sectors_per_ru();
    let ru_bytes = geometry.ru_bytes();
    let queue = ctx.queues[column]
        .as_ref()
        .ok_or_else(|| Error::Internal(format!("no request queue for column {}", column)))?;

    let mut report = WorkerReport::default();
    let mut buffer = ReconBuffer::exclusive(config.row, column, ru_bytes);
    let mut scratch = vec![0u8; ru_bytes];
    let mut rng = config.seed ^ ((column as u64) << 32);
    let last_unit = config.stripes - 1;

    for stripe_id in stripes {
        if !ctx.heads.advance(column, stripe_id) {
            ctx.pool.check_deadlock()?;
            ctx.heads.wait_turn(column).await;
        }

        let key = RuKey::new(stripe_id, 0);
        let sector = stripe_id * sectors_per_ru;
        for _ in 0..config.foreground_per_ru {
            let unit = splitmix64(&mut rng) % (last_unit + 1);
            queue.enqueue(DiskQueueEntry::normal(
                unit * sectors_per_ru,
                RuKey::new(unit, 0),
                SimRequest::Foreground,
            ));
        }
        queue.enqueue(DiskQueueEntry::low(sector, key, SimRequest::Recon));

        let forced = config.forced_stripes.contains(&stripe_id);
        if forced {
            queue.promote(stripe_id, 0);
        }

        // Serve the queue until our reconstruction read comes up
        loop {
            let entry = queue
                .dequeue()
                .ok_or_else(|| Error::Internal(format!("column {} queue ran dry", column)))?;
            match entry.payload {
                SimRequest::Foreground => {
                    ctx.disks.read(column, entry.sector, &mut scratch).await?;
                    report.foreground_reads += 1;
                }
                SimRequest::Recon => break,
            }
        }

        ctx.disks.read(column, sector, buffer.data_mut()).await?;
        report.recon_reads += 1;
        buffer.set_target(key, sector);

        if forced {
            let unit = ReconBuffer::forced(config.row, column, key, sector, buffer.data().to_vec());
            ctx.pool.force_reconstruction(unit)?;
        } else {
            buffer = submit_with_wait(&ctx.pool, buffer, &mut report).await?;
        }
    }

    // Release held heads before the pool stops counting this column
    ctx.heads.finish(column);
    ctx.pool.retire_column(column)?;
    debug!(
        "RECON: column {} done ({} reads, {} foreground, {} waits)",
        column, report.recon_reads, report.foreground_reads, report.buffer_waits
    );
    Ok(report)
}

/// Submit, parking on the pool whenever it has no buffer.
async fn submit_with_wait(
    pool: &ReconBufferPool,
    mut buffer: ReconBuffer,
    report: &mut WorkerReport,
) -> Result<ReconBuffer> {
    let mut use_committed = false;
    loop {
        match pool.submit(buffer, false, use_committed)? {
            SubmitOutcome::Accepted(Some(returned)) => return Ok(returned),
            SubmitOutcome::Accepted(None) => {
                return Err(Error::Internal("pool kept an exclusive buffer".into()))
            }
            SubmitOutcome::WouldBlock(returned, waiter) => {
                report.buffer_waits += 1;
                use_committed = waiter.wait().await?.committed;
                buffer = returned;
            }
        }
    }
}

/// Drain full buffers in batches, check them against the failed disk's
/// original contents and write them to the replacement.
#[instrument(skip(ctx, golden))]
async fn run_write_back(
    ctx: Arc<SimContext>,
    expected: usize,
    golden: Vec<u8>,
) -> Result<WriteBackReport> {
    let failed = ctx.config.failed_column;
    let bytes_per_sector = ctx.config.geometry.bytes_per_sector;
    let mut report = WriteBackReport::default();

    while report.rebuilt_units < expected {
        let batch = ctx.pool.next_full_batch().await;
        report.batches += 1;
        report.largest_batch = report.largest_batch.max(batch.len());

        let mut last_offset = None;
        for full in batch {
            let key = full.key();
            let offset = full.failed_disk_sector_offset();
            if full.kind() == BufferType::Forced {
                report.forced_units += 1;
            } else {
                if last_offset.is_some_and(|last| last > offset) {
                    return Err(Error::Verification {
                        stripe_id: key.stripe_id,
                        ru: key.ru,
                        reason: format!("written after offset {:?} within one batch", last_offset),
                    });
                }
                last_offset = Some(offset);
            }

            let start = offset as usize * bytes_per_sector;
            let original = &golden[start..start + full.data().len()];
            if full.data() != original {
                return Err(Error::Verification {
                    stripe_id: key.stripe_id,
                    ru: key.ru,
                    reason: "reconstructed data differs from the failed disk".into(),
                });
            }

            ctx.disks.write(failed, offset, full.data()).await?;
            report.bytes += full.data().len() as u64;
            report.rebuilt_units += 1;
            ctx.pool.complete_write_back(full);
        }
    }

    Ok(report)
}
