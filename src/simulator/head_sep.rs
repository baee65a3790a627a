//! Head separation control
//!
//! Keeps reconstruction workers from drifting too far apart. A worker about
//! to read the RU at `position` may go ahead only once every other worker has
//! reached at least `position - limit`. Workers that are done report
//! `u64::MAX`.
//!
//! Held workers are counted on a shared stall counter so the buffer pool can
//! tell a worker waiting here from one that is still making progress.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
struct Heads {
    positions: Vec<u64>,
    held: Vec<bool>,
}

#[derive(Debug)]
pub struct HeadSeparation {
    limit: u64,
    heads: Mutex<Heads>,
    stalled: Arc<AtomicUsize>,
    moved: Notify,
}

impl HeadSeparation {
    /// Track `workers` out of `num_columns` columns. A `limit` of 0 disables
    /// waiting. Held workers are added to `stalled`.
    pub fn new(
        num_columns: usize,
        workers: &[usize],
        limit: u64,
        stalled: Arc<AtomicUsize>,
    ) -> Self {
        let mut positions = vec![u64::MAX; num_columns];
        for &column in workers {
            positions[column] = 0;
        }
        Self {
            limit,
            heads: Mutex::new(Heads {
                positions,
                held: vec![false; num_columns],
            }),
            stalled,
            moved: Notify::new(),
        }
    }

    fn slowest_other(positions: &[u64], column: usize) -> u64 {
        positions
            .iter()
            .enumerate()
            .filter(|(c, _)| *c != column)
            .map(|(_, p)| *p)
            .min()
            .unwrap_or(u64::MAX)
    }

    fn may_proceed(&self, positions: &[u64], column: usize) -> bool {
        self.limit == 0
            || positions[column] <= Self::slowest_other(positions, column).saturating_add(self.limit)
    }

    /// Let go of every held worker that is now inside the window.
    fn release_ready(&self, heads: &mut Heads) {
        let Heads { positions, held } = heads;
        for column in 0..held.len() {
            if held[column] && self.may_proceed(positions, column) {
                held[column] = false;
                self.stalled.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Record that `column` is moving to `position`. Returns `false` when it
    /// is too far ahead; it is then held until [`Self::wait_turn`] returns.
    pub fn advance(&self, column: usize, position: u64) -> bool {
        let proceed = {
            let mut heads = self.heads.lock();
            heads.positions[column] = position;
            self.release_ready(&mut heads);
            let proceed = self.may_proceed(&heads.positions, column);
            if !proceed {
                heads.held[column] = true;
                self.stalled.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "RECON: column {} at {} waiting for slowest head at {}",
                    column,
                    position,
                    Self::slowest_other(&heads.positions, column)
                );
            }
            proceed
        };
        self.moved.notify_waiters();
        proceed
    }

    /// Wait until `column` is no longer held.
    pub async fn wait_turn(&self, column: usize) {
        loop {
            let notified = self.moved.notified();
            if !self.heads.lock().held[column] {
                return;
            }
            notified.await;
        }
    }

    /// Column has no more reconstruction reads.
    pub fn finish(&self, column: usize) {
        {
            let mut heads = self.heads.lock();
            heads.positions[column] = u64::MAX;
            self.release_ready(&mut heads);
        }
        self.moved.notify_waiters();
    }

    pub fn position(&self, column: usize) -> u64 {
        self.heads.lock().positions[column]
    }

    /// Workers currently held.
    pub fn held(&self) -> usize {
        self.heads.lock().held.iter().filter(|h| **h).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn heads(
        num_columns: usize,
        workers: &[usize],
        limit: u64,
    ) -> (Arc<HeadSeparation>, Arc<AtomicUsize>) {
        let stalled = Arc::new(AtomicUsize::new(0));
        let heads = HeadSeparation::new(num_columns, workers, limit, stalled.clone());
        (Arc::new(heads), stalled)
    }

    #[tokio::test]
    async fn test_within_limit_does_not_wait() {
        let (heads, stalled) = heads(3, &[0, 1], 2);
        assert!(heads.advance(0, 2));
        assert_eq!(heads.position(0), 2);
        assert_eq!(heads.position(2), u64::MAX);
        assert_eq!(stalled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leader_waits_for_slowest() {
        let (heads, stalled) = heads(2, &[0, 1], 1);
        assert!(!heads.advance(0, 5));
        assert_eq!(stalled.load(Ordering::SeqCst), 1);

        let leader = {
            let heads = heads.clone();
            tokio::spawn(async move { heads.wait_turn(0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!leader.is_finished());

        assert!(heads.advance(1, 3));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!leader.is_finished());
        assert_eq!(heads.held(), 1);

        assert!(heads.advance(1, 4));
        assert_eq!(stalled.load(Ordering::SeqCst), 0);
        tokio::time::timeout(Duration::from_secs(1), leader)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_finish_releases_waiters() {
        let (heads, stalled) = heads(2, &[0, 1], 1);
        assert!(!heads.advance(0, 10));
        let leader = {
            let heads = heads.clone();
            tokio::spawn(async move { heads.wait_turn(0).await })
        };
        tokio::task::yield_now().await;

        heads.finish(1);
        assert_eq!(stalled.load(Ordering::SeqCst), 0);
        tokio::time::timeout(Duration::from_secs(1), leader)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_turn_returns_when_not_held() {
        let (heads, _) = heads(2, &[0, 1], 1);
        assert!(heads.advance(1, 1));
        tokio::time::timeout(Duration::from_secs(1), heads.wait_turn(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unlimited() {
        let (heads, stalled) = heads(2, &[0, 1], 0);
        assert!(heads.advance(0, 1_000));
        assert_eq!(heads.position(0), 1_000);
        assert_eq!(stalled.load(Ordering::SeqCst), 0);
    }
}
