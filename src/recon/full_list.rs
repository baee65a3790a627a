//! Completed buffers awaiting write-back
//!
//! Full buffers are written to the replacement disk in ascending
//! failed-disk sector order regardless of the order in which their parity
//! stripes completed. Buffers for RUs whose reconstruction was forced jump
//! the queue through a separate priority list.

use std::collections::VecDeque;

use super::buffer::BufferHandle;

/// One full buffer, keyed by where it lands on the failed disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullEntry {
    pub handle: BufferHandle,
    pub failed_disk_sector_offset: u64,
}

/// Offset-ordered full buffer list plus the forced-RU priority list.
#[derive(Debug, Default)]
pub struct FullBufferList {
    priority: VecDeque<FullEntry>,
    ordered: Vec<FullEntry>,
}

impl FullBufferList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping ascending offset order; equal offsets stay in arrival
    /// order. Linear scan, the list is bounded by the RUs in flight.
    pub fn insert(&mut self, entry: FullEntry) {
        let pos = self
            .ordered
            .iter()
            .position(|e| e.failed_disk_sector_offset > entry.failed_disk_sector_offset)
            .unwrap_or(self.ordered.len());
        self.ordered.insert(pos, entry);
    }

    /// Queue a buffer ahead of everything on the ordered list.
    pub fn push_priority(&mut self, entry: FullEntry) {
        self.priority.push_back(entry);
    }

    /// Next buffer to write: priority list first, then lowest offset.
    pub fn pop(&mut self) -> Option<FullEntry> {
        if let Some(entry) = self.priority.pop_front() {
            return Some(entry);
        }
        if self.ordered.is_empty() {
            None
        } else {
            Some(self.ordered.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.ordered.is_empty()
    }

    /// Every queued handle, in pop order
    pub fn handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.priority
            .iter()
            .chain(self.ordered.iter())
            .map(|e| e.handle)
    }

    /// Offsets of the ordered list, front to back
    pub fn offsets(&self) -> Vec<u64> {
        self.ordered
            .iter()
            .map(|e| e.failed_disk_sector_offset)
            .collect()
    }
}
