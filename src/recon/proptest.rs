//! Property-Based Tests for Reconstruction
//!
//! # Test Properties
//!
//! 1. **XOR Order Independence**: accumulation result does not depend on
//!    source order or batching
//! 2. **Arrival Order Independence**: any interleaving of column submissions
//!    rebuilds the same data
//! 3. **Write-back Order**: full buffers always leave in ascending offset
//! 4. **Buffer Conservation**: every pool buffer is always in exactly one
//!    place and all of them come home

#![cfg(test)]

use proptest::prelude::*;

use super::buffer::{ReconBuffer, RuKey};
use super::full_list::{FullBufferList, FullEntry};
use super::geometry::{ReconGeometry, ReconPoolConfig, MAX_XOR_SOURCES};
use super::pool::{ReconBufferPool, SubmitOutcome};
use super::xor::xor_into;

const RU_BYTES: usize = 24;

// =============================================================================
// Property Strategies
// =============================================================================

/// Up to eight equally sized sources.
fn sources_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    (1usize..64, 1usize..=MAX_XOR_SOURCES).prop_flat_map(|(len, n)| {
        prop::collection::vec(prop::collection::vec(any::<u8>(), len), n)
    })
}

/// (data columns, stripes, per-column payloads, submission order)
fn submissions_strategy() -> impl Strategy<Value = (usize, usize, Vec<Vec<u8>>, Vec<usize>)> {
    (1usize..=5, 1usize..=6).prop_flat_map(|(data_columns, stripes)| {
        let total = data_columns * stripes;
        (
            Just(data_columns),
            Just(stripes),
            prop::collection::vec(prop::collection::vec(any::<u8>(), RU_BYTES), total),
            Just((0..total).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

fn fold(sources: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; sources[0].len()];
    for src in sources {
        for (o, b) in out.iter_mut().zip(src) {
            *o ^= b;
        }
    }
    out
}

fn pool_for(data_columns: usize, floating: usize, threshold: usize) -> ReconBufferPool {
    let geometry = ReconGeometry {
        num_columns: data_columns + 2,
        num_data_columns: data_columns,
        sectors_per_stripe_unit: 3,
        stripe_units_per_ru: 1,
        bytes_per_sector: 8,
    };
    ReconBufferPool::new(
        0,
        data_columns + 1,
        geometry,
        ReconPoolConfig {
            floating_buffers: floating,
            accumulate_threshold: threshold,
        },
    )
    .unwrap()
}

// =============================================================================
// XOR Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: single pass equals byte-wise fold
    #[test]
    fn prop_xor_matches_fold(sources in sources_strategy()) {
        let mut dest = vec![0u8; sources[0].len()];
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        xor_into(&mut dest, &refs);
        prop_assert_eq!(dest, fold(&sources));
    }

    /// Property: reversing sources or splitting them into batches changes nothing
    #[test]
    fn prop_xor_order_and_batching(sources in sources_strategy(), split in 0usize..MAX_XOR_SOURCES) {
        let len = sources[0].len();
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();

        let mut forward = vec![0u8; len];
        xor_into(&mut forward, &refs);

        let mut reversed = vec![0u8; len];
        let rev: Vec<&[u8]> = refs.iter().rev().copied().collect();
        xor_into(&mut reversed, &rev);

        let mut batched = vec![0u8; len];
        let split = split.min(refs.len());
        for chunk in [&refs[..split], &refs[split..]] {
            if !chunk.is_empty() {
                xor_into(&mut batched, chunk);
            }
        }

        prop_assert_eq!(&forward, &reversed);
        prop_assert_eq!(&forward, &batched);
    }
}

// =============================================================================
// Full List Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: pops come out in ascending offset order
    #[test]
    fn prop_full_list_sorted(offsets in prop::collection::vec(0u64..10_000, 0..50)) {
        let mut arena = super::buffer::BufferArena::new();
        let mut list = FullBufferList::new();
        for &off in &offsets {
            list.insert(FullEntry {
                handle: arena.insert(ReconBuffer::exclusive(0, 0, 1)),
                failed_disk_sector_offset: off,
            });
        }

        let popped: Vec<u64> = std::iter::from_fn(|| list.pop())
            .map(|e| e.failed_disk_sector_offset)
            .collect();
        let mut expected = offsets.clone();
        expected.sort();
        prop_assert_eq!(popped, expected);
    }
}

// =============================================================================
// Pool Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: any arrival order with any threshold rebuilds every RU and
    /// returns every buffer
    #[test]
    fn prop_arrival_order_independent(
        (data_columns, stripes, payloads, order) in submissions_strategy(),
        threshold in 1usize..=4,
    ) {
        let floating = data_columns * stripes;
        let pool = pool_for(data_columns, floating, threshold);

        for &i in &order {
            let column = i % data_columns;
            let stripe_id = (i / data_columns) as u64;
            let mut buffer = ReconBuffer::exclusive(0, column, RU_BYTES);
            buffer.data_mut().copy_from_slice(&payloads[i]);
            buffer.set_target(RuKey::new(stripe_id, 0), stripe_id * 3);

            match pool.submit(buffer, false, false).unwrap() {
                SubmitOutcome::Accepted(returned) => prop_assert!(returned.is_some()),
                SubmitOutcome::WouldBlock(..) => prop_assert!(false, "pool sized to never block"),
            }
            pool.verify_invariants();
            prop_assert_eq!(pool.stats().resident_buffers, floating);
        }

        let mut last_offset = None;
        let mut rebuilt = 0;
        while let Some(full) = pool.get_full_buffer() {
            let stripe = full.key().stripe_id as usize;
            let expected = fold(&payloads[stripe * data_columns..(stripe + 1) * data_columns]);
            prop_assert_eq!(full.data(), expected.as_slice());
            prop_assert_eq!(full.buffer().count, data_columns);

            let offset = full.failed_disk_sector_offset();
            prop_assert!(last_offset.map_or(true, |last| last <= offset));
            last_offset = Some(offset);

            pool.complete_write_back(full);
            rebuilt += 1;
        }

        prop_assert_eq!(rebuilt, stripes);
        prop_assert!(pool.is_idle());
        prop_assert_eq!(pool.stats().floating_free, floating);
        pool.verify_invariants();
    }
}
