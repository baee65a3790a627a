//! Reconstruction Integration Tests
//!
//! Concurrent workers against a shared buffer pool, and complete simulated
//! rebuilds of a failed column.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::task::JoinSet;

use raidrecon::domain::{ColumnState, DiskBackend};
use raidrecon::recon::BufferType;
use raidrecon::simulator::stripe_columns;
use raidrecon::{
    Error, QueueDiscipline, ReconBuffer, ReconBufferPool, ReconGeometry, ReconPoolConfig, RuKey,
    SimulationConfig, Simulator, SubmitOutcome,
};

// =============================================================================
// Helpers
// =============================================================================

const RU_BYTES: usize = 32;

/// 4+1 row with 32 byte RUs
fn geometry() -> ReconGeometry {
    ReconGeometry {
        num_columns: 5,
        num_data_columns: 4,
        sectors_per_stripe_unit: 4,
        stripe_units_per_ru: 1,
        bytes_per_sector: 8,
    }
}

fn payload(column: usize, stripe_id: u64) -> Vec<u8> {
    (0..RU_BYTES)
        .map(|i| (i as u8).wrapping_mul(31) ^ (column as u8).wrapping_mul(73) ^ (stripe_id as u8))
        .collect()
}

fn contribution(column: usize, stripe_id: u64) -> ReconBuffer {
    let mut buffer = ReconBuffer::exclusive(0, column, RU_BYTES);
    buffer.data_mut().copy_from_slice(&payload(column, stripe_id));
    buffer.set_target(RuKey::new(stripe_id, 0), stripe_id * 4);
    buffer
}

fn parity_of(columns: impl IntoIterator<Item = usize>, stripe_id: u64) -> Vec<u8> {
    let mut out = vec![0u8; RU_BYTES];
    for column in columns {
        for (o, b) in out.iter_mut().zip(payload(column, stripe_id)) {
            *o ^= b;
        }
    }
    out
}

/// Submit every stripe in order, waiting out any buffer shortage.
async fn submit_column(
    pool: Arc<ReconBufferPool>,
    column: usize,
    stripes: u64,
) -> raidrecon::Result<u64> {
    let mut waits = 0;
    for stripe_id in 0..stripes {
        let mut buffer = contribution(column, stripe_id);
        let mut use_committed = false;
        loop {
            match pool.submit(buffer, false, use_committed)? {
                SubmitOutcome::Accepted(_) => break,
                SubmitOutcome::WouldBlock(returned, waiter) => {
                    waits += 1;
                    use_committed = waiter.wait().await?.committed;
                    buffer = returned;
                }
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(waits)
}

fn small_sim_config(stripes: u64) -> SimulationConfig {
    SimulationConfig {
        stripes,
        geometry: ReconGeometry {
            sectors_per_stripe_unit: 4,
            bytes_per_sector: 64,
            ..Default::default()
        },
        ..Default::default()
    }
}

// =============================================================================
// Buffer Pool Integration Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_rebuild_every_ru() {
    const STRIPES: u64 = 32;
    let pool = Arc::new(
        ReconBufferPool::new(
            0,
            4,
            geometry(),
            ReconPoolConfig {
                floating_buffers: STRIPES as usize * 3,
                accumulate_threshold: 3,
            },
        )
        .expect("Failed to create pool"),
    );

    let mut workers = JoinSet::new();
    for column in 0..4 {
        workers.spawn(submit_column(pool.clone(), column, STRIPES));
    }

    let write_back = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < STRIPES as usize {
                for full in pool.next_full_batch().await {
                    let stripe_id = full.key().stripe_id;
                    assert_eq!(full.data(), parity_of(0..4, stripe_id).as_slice());
                    assert_eq!(full.failed_disk_sector_offset(), stripe_id * 4);
                    assert_eq!(full.buffer().count, 4);
                    seen.push(stripe_id);
                    pool.complete_write_back(full);
                }
            }
            seen
        })
    };

    while let Some(joined) = workers.join_next().await {
        joined.expect("worker panicked").expect("worker failed");
    }
    let mut seen = tokio::time::timeout(Duration::from_secs(10), write_back)
        .await
        .expect("write-back timed out")
        .expect("write-back panicked");

    seen.sort_unstable();
    assert_eq!(seen, (0..STRIPES).collect::<Vec<_>>());
    assert!(pool.is_idle());
    assert_eq!(pool.stats().floating_free, STRIPES as usize * 3);
    pool.verify_invariants();
}

#[tokio::test]
async fn test_committed_buffer_handed_across_tasks() {
    let pool = Arc::new(
        ReconBufferPool::new(
            0,
            4,
            geometry(),
            ReconPoolConfig {
                floating_buffers: 1,
                accumulate_threshold: 1,
            },
        )
        .unwrap(),
    );
    pool.submit(contribution(0, 1), false, false).unwrap();

    let (buffer, waiter) = match pool.submit(contribution(1, 2), false, false).unwrap() {
        SubmitOutcome::WouldBlock(buffer, waiter) => (buffer, waiter),
        SubmitOutcome::Accepted(_) => panic!("expected the empty pool to block"),
    };
    let blocked = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let wake = waiter.wait().await?;
            assert!(wake.committed);
            assert_eq!(wake.key, RuKey::new(2, 0));
            pool.submit(buffer, false, wake.committed)
        })
    };

    for column in 1..4 {
        pool.submit(contribution(column, 1), false, false).unwrap();
    }
    let full = pool.next_full_buffer().await;
    assert_eq!(full.key(), RuKey::new(1, 0));
    pool.complete_write_back(full);

    let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("blocked worker was never woken")
        .unwrap()
        .unwrap();
    assert_matches!(outcome, SubmitOutcome::Accepted(Some(_)));

    for column in [0, 2, 3] {
        pool.submit(contribution(column, 2), false, false).unwrap();
    }
    let full = pool.get_full_buffer().unwrap();
    assert_eq!(full.data(), parity_of(0..4, 2).as_slice());
    pool.complete_write_back(full);
    assert!(pool.is_idle());
    pool.verify_invariants();
}

#[test]
fn test_deadlock_reported_to_last_worker() {
    // 3 surviving columns that each need their own buffer
    let geometry = ReconGeometry {
        num_columns: 4,
        num_data_columns: 3,
        ..geometry()
    };
    let pool = ReconBufferPool::new(
        7,
        3,
        geometry,
        ReconPoolConfig {
            floating_buffers: 1,
            accumulate_threshold: 1,
        },
    )
    .unwrap();

    pool.submit(contribution(0, 0), false, false).unwrap();
    assert_matches!(
        pool.submit(contribution(0, 1), false, false).unwrap(),
        SubmitOutcome::WouldBlock(..)
    );
    assert_matches!(
        pool.submit(contribution(1, 2), false, false).unwrap(),
        SubmitOutcome::WouldBlock(..)
    );

    let err = pool.submit(contribution(2, 3), false, false).unwrap_err();
    assert_matches!(
        err,
        Error::BufferWaitDeadlock {
            row: 7,
            blocked: 3,
            columns: 4
        }
    );
    assert!(err.to_string().contains("row 7"));
    assert_eq!(pool.stats().blocked_workers, 2);
}

#[tokio::test]
async fn test_forced_reconstruction_jumps_write_back_queue() {
    let pool = ReconBufferPool::new(0, 4, geometry(), ReconPoolConfig::default()).unwrap();
    for stripe_id in [3u64, 1] {
        for column in 0..4 {
            pool.submit(contribution(column, stripe_id), false, false)
                .unwrap();
        }
    }

    let key = RuKey::new(20, 0);
    for column in 0..4 {
        let forced = ReconBuffer::forced(0, column, key, 80, payload(column, 20));
        pool.force_reconstruction(forced).unwrap();
    }

    let batch = pool.next_full_batch().await;
    let order: Vec<(u64, BufferType)> = batch
        .iter()
        .map(|full| (full.key().stripe_id, full.kind()))
        .collect();
    assert_eq!(
        order,
        vec![
            (20, BufferType::Forced),
            (1, BufferType::Floating),
            (3, BufferType::Floating)
        ]
    );
    assert_eq!(batch[0].data(), parity_of(0..4, 20).as_slice());

    for full in batch {
        pool.complete_write_back(full);
    }
    assert!(pool.is_idle());
    pool.verify_invariants();
}

// =============================================================================
// Simulated Rebuild Tests
// =============================================================================

#[tokio::test]
async fn test_rebuild_with_every_discipline() {
    for discipline in [
        QueueDiscipline::Sstf,
        QueueDiscipline::Scan,
        QueueDiscipline::Cscan,
        QueueDiscipline::Fifo,
    ] {
        let mut config = small_sim_config(16);
        config.queue.discipline = discipline;
        config.foreground_per_ru = 2;

        let sim = Simulator::new(config).expect("Failed to build simulator");
        let report = sim.run(None).await.expect("Rebuild failed");

        assert_eq!(report.rebuilt_units, 16, "{}", discipline);
        assert_eq!(report.recon_reads, 16 * 4, "{}", discipline);
        assert_eq!(report.foreground_reads, 16 * 4 * 2, "{}", discipline);
        assert_eq!(sim.disks().column_state(4).unwrap(), ColumnState::Optimal);
    }
}

#[tokio::test]
async fn test_rebuild_declustered_row() {
    // Stripes span 4 of 7 columns, so column 2 holds units of 8 of 14 stripes
    let config = SimulationConfig {
        stripes: 14,
        failed_column: 2,
        geometry: ReconGeometry {
            num_columns: 7,
            num_data_columns: 3,
            sectors_per_stripe_unit: 2,
            stripe_units_per_ru: 2,
            bytes_per_sector: 16,
        },
        ..Default::default()
    };

    let sim = Simulator::new(config).unwrap();
    let report = sim.run(None).await.unwrap();

    assert_eq!(report.rebuilt_units, 8);
    assert_eq!(report.recon_reads, 8 * 3);
    assert_eq!(report.bytes_rebuilt, 8 * 64);
    assert_eq!(sim.disks().column_state(2).unwrap(), ColumnState::Optimal);
}

#[tokio::test]
async fn test_rebuild_with_forced_stripes() {
    let mut config = small_sim_config(12);
    config.forced_stripes = vec![2, 9];
    config.queue.discipline = QueueDiscipline::Cscan;

    let sim = Simulator::new(config).unwrap();
    let report = sim.run(None).await.unwrap();

    assert_eq!(report.rebuilt_units, 12);
    assert_eq!(report.forced_units, 2);
    // Each surviving column promotes its own read for both forced stripes
    assert_eq!(report.promoted_requests, 2 * 4);
}

#[tokio::test]
async fn test_rebuild_exports_pool_metrics() {
    let registry = Registry::new();
    let sim = Simulator::new(small_sim_config(8)).unwrap();
    let report = sim.run(Some(&registry)).await.unwrap();
    assert_eq!(report.rebuilt_units, 8);

    let mut text = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut text)
        .unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("raidrecon_full_buffers_total{row=\"0\"} 8"));
    assert!(text.contains("raidrecon_write_backs_total{row=\"0\"} 8"));
    assert!(text.contains("raidrecon_blocked_workers{row=\"0\"} 0"));
}

#[tokio::test]
async fn test_invalid_simulation_rejected() {
    let mut config = small_sim_config(8);
    config.pool.floating_buffers = 0;
    assert_matches!(Simulator::new(config).err(), Some(Error::InvalidConfig(_)));
}

// =============================================================================
// Undersized Pool Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_undersized_pool_rebuilds_or_reports_deadlock() {
    // (columns, data columns, floating buffers, head separation limit)
    for (columns, data, floating, limit) in [(6, 2, 2, 0), (5, 2, 2, 0), (6, 3, 3, 2)] {
        let geometry = ReconGeometry {
            num_columns: columns,
            num_data_columns: data,
            sectors_per_stripe_unit: 2,
            stripe_units_per_ru: 1,
            bytes_per_sector: 16,
        };
        let affected = (0..12u64)
            .filter(|&s| stripe_columns(&geometry, s).contains(&0))
            .count();
        let config = SimulationConfig {
            stripes: 12,
            failed_column: 0,
            head_separation_limit: limit,
            geometry,
            pool: ReconPoolConfig {
                floating_buffers: floating,
                accumulate_threshold: 1,
            },
            ..Default::default()
        };

        let sim = Simulator::new(config).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(10), sim.run(None))
            .await
            .unwrap_or_else(|_| panic!("rebuild with {} columns, {} data hung", columns, data));
        match result {
            Ok(report) => assert_eq!(report.rebuilt_units, affected),
            Err(e) => assert_matches!(e, Error::BufferWaitDeadlock { row: 0, .. }),
        }
    }
}
