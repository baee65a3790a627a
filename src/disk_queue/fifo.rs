//! First-come first-served queue
//!
//! Normal requests in arrival order, then low-priority requests in arrival
//! order. The arm position is tracked only for reporting.

use std::collections::VecDeque;

use super::{ArmState, DiskQueue, DiskQueueEntry, Priority, QueueDiscipline};
use crate::recon::RuKey;

#[derive(Debug)]
pub struct FifoQueue<T> {
    normal: VecDeque<DiskQueueEntry<T>>,
    low: VecDeque<DiskQueueEntry<T>>,
    arm: ArmState,
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self::with_arm(QueueDiscipline::Fifo.default_arm())
    }

    pub fn with_arm(arm: ArmState) -> Self {
        Self {
            normal: VecDeque::new(),
            low: VecDeque::new(),
            arm,
        }
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> DiskQueue<T> for FifoQueue<T> {
    fn discipline(&self) -> QueueDiscipline {
        QueueDiscipline::Fifo
    }

    fn enqueue(&mut self, entry: DiskQueueEntry<T>) {
        match entry.priority {
            Priority::Normal => self.normal.push_back(entry),
            Priority::Low => self.low.push_back(entry),
        }
    }

    fn dequeue(&mut self) -> Option<DiskQueueEntry<T>> {
        let entry = self.normal.pop_front().or_else(|| self.low.pop_front())?;
        self.arm.last_sector = entry.sector;
        Some(entry)
    }

    fn peek(&self) -> Option<&DiskQueueEntry<T>> {
        self.normal.front().or_else(|| self.low.front())
    }

    fn promote(&mut self, stripe_id: u64, ru: u32) -> usize {
        let target = RuKey::new(stripe_id, ru);
        let mut kept = VecDeque::with_capacity(self.low.len());
        let mut moved = 0;
        for mut entry in self.low.drain(..) {
            if entry.key == target {
                entry.priority = Priority::Normal;
                self.normal.push_back(entry);
                moved += 1;
            } else {
                kept.push_back(entry);
            }
        }
        self.low = kept;
        moved
    }

    fn len(&self) -> usize {
        self.normal.len() + self.low.len()
    }

    fn low_len(&self) -> usize {
        self.low.len()
    }

    fn arm(&self) -> ArmState {
        self.arm
    }
}
