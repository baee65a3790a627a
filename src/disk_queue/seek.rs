//! Seek-ordered queues: SSTF, SCAN and CSCAN
//!
//! All three share one layout. Normal requests below the arm go to the left
//! sub-queue, the rest to the right sub-queue; both are kept sorted by
//! sector. Low-priority requests sit in their own sorted sub-queue and are
//! only considered once both sides are empty.
//!
//! Sub-queues are not rebalanced when the arm moves, so an entry's side
//! reflects where the arm was when it arrived.

use std::collections::BTreeMap;

use super::{ArmState, Direction, DiskQueue, DiskQueueEntry, Priority, QueueDiscipline};
use crate::recon::RuKey;

/// (sector, arrival sequence): sorts by sector, arrival order on ties.
type EntryKey = (u64, u64);

type SubQueue<T> = BTreeMap<EntryKey, DiskQueueEntry<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Low,
}

/// Which entry to serve next and the arm direction afterwards.
#[derive(Debug, Clone, Copy)]
struct Selection {
    side: Side,
    key: EntryKey,
    dir: Direction,
    /// CSCAN wrap-around: the left sub-queue becomes the right one
    rewind: bool,
}

impl Selection {
    fn new(side: Side, key: EntryKey, dir: Direction) -> Self {
        Self {
            side,
            key,
            dir,
            rewind: false,
        }
    }
}

/// SSTF / SCAN / CSCAN request queue for one disk.
#[derive(Debug)]
pub struct SeekQueue<T> {
    discipline: QueueDiscipline,
    left: SubQueue<T>,
    right: SubQueue<T>,
    low: SubQueue<T>,
    arm: ArmState,
    seq: u64,
}

impl<T> SeekQueue<T> {
    /// Queue with the discipline's default arm state.
    pub fn new(discipline: QueueDiscipline) -> Self {
        Self::with_arm(discipline, discipline.default_arm())
    }

    /// # Panics
    ///
    /// Panics for [`QueueDiscipline::Fifo`], which has its own queue type.
    pub fn with_arm(discipline: QueueDiscipline, arm: ArmState) -> Self {
        assert!(
            discipline != QueueDiscipline::Fifo,
            "fifo is not a seek-ordered discipline"
        );
        Self {
            discipline,
            left: BTreeMap::new(),
            right: BTreeMap::new(),
            low: BTreeMap::new(),
            arm,
            seq: 0,
        }
    }

    fn sub_queue(&self, side: Side) -> &SubQueue<T> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
            Side::Low => &self.low,
        }
    }

    fn left_tail(&self) -> Option<EntryKey> {
        self.left.keys().next_back().copied()
    }

    fn right_head(&self) -> Option<EntryKey> {
        self.right.keys().next().copied()
    }

    fn select(&self) -> Option<Selection> {
        match self.discipline {
            QueueDiscipline::Sstf => self.select_sstf(),
            QueueDiscipline::Scan => self.select_scan(),
            QueueDiscipline::Cscan => self.select_cscan(),
            QueueDiscipline::Fifo => None,
        }
    }

    /// Shortest seek first between the two ends nearest the arm.
    fn select_sstf(&self) -> Option<Selection> {
        let last = self.arm.last_sector;
        let dir = self.arm.dir;
        match (self.left_tail(), self.right_head()) {
            (Some(l), Some(r)) => {
                let to_left = l.0.abs_diff(last);
                let to_right = r.0.abs_diff(last);
                if to_right < to_left || (to_right == to_left && dir == Direction::Right) {
                    Some(Selection::new(Side::Right, r, dir))
                } else {
                    Some(Selection::new(Side::Left, l, dir))
                }
            }
            (Some(l), None) => Some(Selection::new(Side::Left, l, dir)),
            (None, Some(r)) => Some(Selection::new(Side::Right, r, dir)),
            (None, None) => self.closest_to_arm(),
        }
    }

    /// Elevator: keep sweeping until the current side runs dry.
    fn select_scan(&self) -> Option<Selection> {
        match (self.left_tail(), self.right_head()) {
            (None, None) => self.closest_to_arm(),
            (None, Some(r)) => Some(Selection::new(Side::Right, r, Direction::Right)),
            (Some(l), None) => Some(Selection::new(Side::Left, l, Direction::Left)),
            (Some(l), Some(r)) => Some(if self.arm.dir == Direction::Left {
                Selection::new(Side::Left, l, Direction::Left)
            } else {
                Selection::new(Side::Right, r, Direction::Right)
            }),
        }
    }

    /// Circular elevator: sweep right, then jump back to the lowest request.
    fn select_cscan(&self) -> Option<Selection> {
        let dir = self.arm.dir;
        if let Some(r) = self.right_head() {
            return Some(Selection::new(Side::Right, r, dir));
        }
        match self.left.keys().next() {
            Some(&l) => Some(Selection {
                side: Side::Left,
                key: l,
                dir,
                rewind: true,
            }),
            None => self.closest_to_arm(),
        }
    }

    /// Nearest low-priority request honouring the sweep direction.
    fn closest_to_arm(&self) -> Option<Selection> {
        let last = self.arm.last_sector;
        let best_r = self.low.range((last, 0)..).next().map(|(k, _)| *k);
        let best_l = self.low.range(..(last, 0)).next_back().map(|(k, _)| *k);
        let first = self.low.keys().next().copied()?;
        let ArmState {
            dir, allow_reverse, ..
        } = self.arm;

        let low = |key, dir| Some(Selection::new(Side::Low, key, dir));
        match (dir, best_l, best_r) {
            (Direction::Either, Some(l), Some(r)) => {
                if r.0 - last < last - l.0 {
                    low(r, dir)
                } else {
                    low(l, dir)
                }
            }
            (Direction::Either, Some(l), None) => low(l, dir),
            (Direction::Either, None, Some(r)) => low(r, dir),

            (Direction::Right, _, Some(r)) => low(r, dir),
            (Direction::Right, Some(l), None) if allow_reverse => low(l, Direction::Left),

            (Direction::Left, Some(l), _) => low(l, dir),
            (Direction::Left, None, Some(r)) if allow_reverse => low(r, Direction::Right),

            _ => low(first, dir),
        }
    }

    fn insert(&mut self, entry: DiskQueueEntry<T>) {
        let key = (entry.sector, self.seq);
        self.seq += 1;
        match entry.priority {
            Priority::Low => self.low.insert(key, entry),
            Priority::Normal if entry.sector < self.arm.last_sector => {
                self.left.insert(key, entry)
            }
            Priority::Normal => self.right.insert(key, entry),
        };
    }
}

impl<T: Send> DiskQueue<T> for SeekQueue<T> {
    fn discipline(&self) -> QueueDiscipline {
        self.discipline
    }

    fn enqueue(&mut self, entry: DiskQueueEntry<T>) {
        self.insert(entry);
    }

    fn dequeue(&mut self) -> Option<DiskQueueEntry<T>> {
        let selection = self.select()?;
        if selection.rewind {
            std::mem::swap(&mut self.left, &mut self.right);
        }
        let side = if selection.rewind {
            Side::Right
        } else {
            selection.side
        };
        let entry = match side {
            Side::Left => self.left.remove(&selection.key),
            Side::Right => self.right.remove(&selection.key),
            Side::Low => self.low.remove(&selection.key),
        }?;

        self.arm.last_sector = entry.sector;
        self.arm.dir = selection.dir;
        Some(entry)
    }

    fn peek(&self) -> Option<&DiskQueueEntry<T>> {
        let selection = self.select()?;
        self.sub_queue(selection.side).get(&selection.key)
    }

    fn promote(&mut self, stripe_id: u64, ru: u32) -> usize {
        let target = RuKey::new(stripe_id, ru);
        let (promoted, kept): (SubQueue<T>, SubQueue<T>) = std::mem::take(&mut self.low)
            .into_iter()
            .partition(|(_, entry)| entry.key == target);
        self.low = kept;

        let moved = promoted.len();
        for (_, mut entry) in promoted {
            entry.priority = Priority::Normal;
            self.insert(entry);
        }
        moved
    }

    fn len(&self) -> usize {
        self.left.len() + self.right.len() + self.low.len()
    }

    fn low_len(&self) -> usize {
        self.low.len()
    }

    fn arm(&self) -> ArmState {
        self.arm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(discipline: QueueDiscipline, last_sector: u64, dir: Direction, allow_reverse: bool) -> SeekQueue<u64> {
        SeekQueue::with_arm(
            discipline,
            ArmState {
                last_sector,
                dir,
                allow_reverse,
            },
        )
    }

    fn normal(q: &mut SeekQueue<u64>, sectors: &[u64]) {
        for &s in sectors {
            q.enqueue(DiskQueueEntry::normal(s, RuKey::new(s, 0), s));
        }
    }

    fn low(q: &mut SeekQueue<u64>, sectors: &[u64]) {
        for &s in sectors {
            q.enqueue(DiskQueueEntry::low(s, RuKey::new(s, 0), s));
        }
    }

    fn drain(q: &mut SeekQueue<u64>) -> Vec<u64> {
        std::iter::from_fn(|| q.dequeue()).map(|e| e.sector).collect()
    }

    // =========================================================================
    // SSTF
    // =========================================================================

    #[test]
    fn test_sstf_shortest_seek_first() {
        let mut q = queue(QueueDiscipline::Sstf, 40, Direction::Right, false);
        normal(&mut q, &[10, 50, 80]);
        assert_eq!(drain(&mut q), vec![50, 80, 10]);
        assert_eq!(q.arm().last_sector, 10);
        assert_eq!(q.arm().dir, Direction::Right);
    }

    #[test]
    fn test_sstf_tie_follows_direction() {
        let mut q = queue(QueueDiscipline::Sstf, 50, Direction::Either, true);
        normal(&mut q, &[40, 60]);
        assert_eq!(q.dequeue().unwrap().sector, 40);

        let mut q = queue(QueueDiscipline::Sstf, 50, Direction::Right, true);
        normal(&mut q, &[40, 60]);
        assert_eq!(q.dequeue().unwrap().sector, 60);
    }

    #[test]
    fn test_sstf_low_only_when_normal_empty() {
        let mut q = SeekQueue::new(QueueDiscipline::Sstf);
        low(&mut q, &[5]);
        normal(&mut q, &[1000]);
        assert_eq!(drain(&mut q), vec![1000, 5]);
    }

    #[test]
    fn test_sstf_low_closest_either_way() {
        let mut q = queue(QueueDiscipline::Sstf, 60, Direction::Either, true);
        low(&mut q, &[10, 100]);
        assert_eq!(drain(&mut q), vec![100, 10]);
    }

    #[test]
    fn test_low_reverse_flips_direction() {
        let mut q = queue(QueueDiscipline::Sstf, 50, Direction::Right, true);
        low(&mut q, &[10, 30]);
        assert_eq!(q.dequeue().unwrap().sector, 30);
        assert_eq!(q.arm().dir, Direction::Left);
        assert_eq!(q.dequeue().unwrap().sector, 10);
    }

    #[test]
    fn test_low_without_reverse_falls_back_to_start() {
        let mut q = queue(QueueDiscipline::Sstf, 50, Direction::Right, false);
        low(&mut q, &[20, 10]);
        assert_eq!(q.dequeue().unwrap().sector, 10);
        assert_eq!(q.arm().dir, Direction::Right);
        // Arm is now at 10, so 20 lies ahead
        assert_eq!(q.dequeue().unwrap().sector, 20);
    }

    // =========================================================================
    // SCAN / CSCAN
    // =========================================================================

    #[test]
    fn test_scan_sweeps_then_reverses() {
        let mut q = queue(QueueDiscipline::Scan, 50, Direction::Right, true);
        normal(&mut q, &[10, 30, 70, 90]);
        assert_eq!(q.dequeue().unwrap().sector, 70);
        assert_eq!(q.dequeue().unwrap().sector, 90);
        assert_eq!(q.dequeue().unwrap().sector, 30);
        assert_eq!(q.arm().dir, Direction::Left);

        // Sweeping left: stay left while it has work
        normal(&mut q, &[60, 5]);
        assert_eq!(drain(&mut q), vec![10, 5, 60]);
        assert_eq!(q.arm().dir, Direction::Right);
    }

    #[test]
    fn test_cscan_rewinds() {
        let mut q = queue(QueueDiscipline::Cscan, 20, Direction::Right, false);
        normal(&mut q, &[5, 15, 25]);
        assert_eq!(drain(&mut q), vec![25, 5, 15]);
    }

    #[test]
    fn test_cscan_new_requests_after_rewind() {
        let mut q = queue(QueueDiscipline::Cscan, 20, Direction::Right, false);
        normal(&mut q, &[5, 15, 25]);
        assert_eq!(q.dequeue().unwrap().sector, 25);
        assert_eq!(q.dequeue().unwrap().sector, 5);

        normal(&mut q, &[2, 8]);
        assert_eq!(drain(&mut q), vec![8, 15, 2]);
    }

    // =========================================================================
    // Peek / Promote
    // =========================================================================

    #[test]
    fn test_peek_has_no_side_effects() {
        let mut q = queue(QueueDiscipline::Cscan, 20, Direction::Right, false);
        normal(&mut q, &[5, 15]);

        assert_eq!(q.peek().unwrap().sector, 5);
        assert_eq!(q.peek().unwrap().sector, 5);
        assert_eq!(q.arm().last_sector, 20);
        assert_eq!(q.len(), 2);

        assert_eq!(q.dequeue().unwrap().sector, 5);
        assert!(q.peek().is_some());
    }

    #[test]
    fn test_promote_moves_matching_low_entries() {
        let mut q = queue(QueueDiscipline::Sstf, 55, Direction::Either, true);
        let key = RuKey::new(3, 0);
        q.enqueue(DiskQueueEntry::low(30, key, 30));
        q.enqueue(DiskQueueEntry::low(70, key, 70));
        q.enqueue(DiskQueueEntry::low(20, RuKey::new(4, 0), 20));
        normal(&mut q, &[90]);

        assert_eq!(q.promote(3, 0), 2);
        assert_eq!(q.low_len(), 1);
        assert_eq!(q.promote(3, 0), 0);

        let served: Vec<(u64, Priority)> = std::iter::from_fn(|| q.dequeue())
            .map(|e| (e.sector, e.priority))
            .collect();
        assert_eq!(
            served,
            vec![
                (70, Priority::Normal),
                (90, Priority::Normal),
                (30, Priority::Normal),
                (20, Priority::Low),
            ]
        );
    }

    #[test]
    fn test_empty_queue() {
        let mut q: SeekQueue<u64> = SeekQueue::new(QueueDiscipline::Scan);
        assert!(q.peek().is_none());
        assert!(q.dequeue().is_none());
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic(expected = "not a seek-ordered")]
    fn test_fifo_rejected() {
        let _: SeekQueue<u64> = SeekQueue::new(QueueDiscipline::Fifo);
    }
}
