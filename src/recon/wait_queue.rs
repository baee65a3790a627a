//! Buffer wait queue
//!
//! Workers that fail to obtain a buffer park here in arrival order. Each
//! waiter is a plain record plus a one-shot channel; waking it means sending
//! a [`BufferWake`] down that channel.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::debug;

use super::buffer::RuKey;
use crate::error::{Error, Result};

/// A blocked worker: (row, column, stripe id, RU).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWaitEntry {
    pub row: usize,
    pub column: usize,
    pub key: RuKey,
}

/// Why a blocked worker was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWake {
    /// RU the worker was waiting on
    pub key: RuKey,

    /// A pool buffer has been committed to this worker; it must resubmit
    /// with `use_committed` set.
    pub committed: bool,
}

/// Receiving side handed to a worker whose submission would block.
#[derive(Debug)]
pub struct BufferWaiter {
    entry: BufferWaitEntry,
    rx: oneshot::Receiver<BufferWake>,
}

impl BufferWaiter {
    /// The wait record this waiter belongs to
    pub fn entry(&self) -> BufferWaitEntry {
        self.entry
    }

    /// Suspend until the pool wakes this worker.
    pub async fn wait(self) -> Result<BufferWake> {
        let BufferWaitEntry { row, column, .. } = self.entry;
        self.rx
            .await
            .map_err(|_| Error::WaiterDropped { row, column })
    }

    /// Blocking variant of [`wait`](Self::wait) for plain threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> Result<BufferWake> {
        let BufferWaitEntry { row, column, .. } = self.entry;
        self.rx
            .blocking_recv()
            .map_err(|_| Error::WaiterDropped { row, column })
    }

    /// Non-blocking check, for pollers.
    pub fn try_wake(&mut self) -> Option<BufferWake> {
        self.rx.try_recv().ok()
    }
}

/// Pool side of a parked worker.
#[derive(Debug)]
pub struct WaitRecord {
    pub entry: BufferWaitEntry,
    tx: oneshot::Sender<BufferWake>,
}

impl WaitRecord {
    /// Create the record and the matching waiter.
    pub fn new(entry: BufferWaitEntry) -> (Self, BufferWaiter) {
        let (tx, rx) = oneshot::channel();
        (Self { entry, tx }, BufferWaiter { entry, rx })
    }

    /// Wake the worker. Returns false if it already went away.
    pub fn wake(self, committed: bool) -> bool {
        let delivered = self
            .tx
            .send(BufferWake {
                key: self.entry.key,
                committed,
            })
            .is_ok();
        if !delivered {
            debug!(
                "RECON: waiter row {} col {} for {} is gone",
                self.entry.row, self.entry.column, self.entry.key
            );
        }
        delivered
    }

    /// Whether the worker still listens for a wakeup
    pub fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Per-row FIFO of workers blocked on an exhausted buffer pool.
#[derive(Debug, Default)]
pub struct BufferWaitQueue {
    waiters: VecDeque<WaitRecord>,
}

impl BufferWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: WaitRecord) {
        self.waiters.push_back(record);
    }

    /// Oldest waiter, live or not.
    pub fn pop_oldest(&mut self) -> Option<WaitRecord> {
        self.waiters.pop_front()
    }

    /// Remove the first waiter blocked on `key`.
    pub fn remove_first_for(&mut self, key: RuKey) -> Option<WaitRecord> {
        let pos = self.waiters.iter().position(|w| w.entry.key == key)?;
        self.waiters.remove(pos)
    }

    /// Whether any worker, live or not, is still queued for `key`.
    pub fn has_waiter_for(&self, key: RuKey) -> bool {
        self.waiters.iter().any(|w| w.entry.key == key)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Snapshot of the queued records, oldest first
    pub fn entries(&self) -> Vec<BufferWaitEntry> {
        self.waiters.iter().map(|w| w.entry).collect()
    }
}
