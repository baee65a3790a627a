//! Parity stripe status tracking
//!
//! One [`ParityStripeStatus`] exists per reconstruction unit that currently
//! has contributions in flight. It records the destination buffer, the
//! buffers queued for the next XOR, and who is waiting on the RU.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;

use super::buffer::{BufferHandle, RuKey};
use super::geometry::MAX_XOR_SOURCES;
use super::wait_queue::WaitRecord;

/// Lifecycle of a parity stripe status entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PssState {
    /// No buffer installed yet
    Created,
    /// Destination installed, contributions still arriving
    Accumulating,
    /// A submission for this RU could not get a buffer
    BufferWaitPending,
    /// Every data column has contributed
    Full,
}

impl fmt::Display for PssState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PssState::Created => write!(f, "created"),
            PssState::Accumulating => write!(f, "accumulating"),
            PssState::BufferWaitPending => write!(f, "buffer-wait"),
            PssState::Full => write!(f, "full"),
        }
    }
}

/// Bookkeeping for one (parity stripe, RU).
#[derive(Debug)]
pub struct ParityStripeStatus {
    pub key: RuKey,
    dest: Option<BufferHandle>,
    pending: SmallVec<[BufferHandle; MAX_XOR_SOURCES]>,
    buffer_wait: bool,
    forced: bool,
    full: bool,
    waiters: Vec<WaitRecord>,
}

impl ParityStripeStatus {
    pub fn new(key: RuKey) -> Self {
        Self {
            key,
            dest: None,
            pending: SmallVec::new(),
            buffer_wait: false,
            forced: false,
            full: false,
            waiters: Vec::new(),
        }
    }

    pub fn state(&self) -> PssState {
        if self.full {
            PssState::Full
        } else if self.buffer_wait {
            PssState::BufferWaitPending
        } else if self.dest.is_some() {
            PssState::Accumulating
        } else {
            PssState::Created
        }
    }

    /// Destination buffer, if one has been installed
    pub fn dest(&self) -> Option<BufferHandle> {
        self.dest
    }

    /// Buffers waiting for the next XOR
    pub fn pending(&self) -> &[BufferHandle] {
        &self.pending
    }

    pub fn xor_buf_count(&self) -> usize {
        self.pending.len()
    }

    /// Install a buffer: the first one becomes the destination, the rest
    /// queue for XOR. Returns true when it became the destination.
    pub fn install(&mut self, handle: BufferHandle) -> bool {
        if self.dest.is_none() {
            self.dest = Some(handle);
            true
        } else {
            assert!(
                self.pending.len() < MAX_XOR_SOURCES,
                "{}: more than {} buffers queued for xor",
                self.key,
                MAX_XOR_SOURCES
            );
            self.pending.push(handle);
            false
        }
    }

    /// Hand the queued buffers to an XOR, leaving the queue empty.
    pub fn drain_pending(&mut self) -> SmallVec<[BufferHandle; MAX_XOR_SOURCES]> {
        std::mem::take(&mut self.pending)
    }

    /// Unlink the destination once the RU is full.
    pub fn take_full_dest(&mut self) -> BufferHandle {
        assert!(
            self.pending.is_empty(),
            "{}: full with {} buffers still queued",
            self.key,
            self.pending.len()
        );
        self.full = true;
        self.dest
            .take()
            .unwrap_or_else(|| panic!("{}: full without a destination buffer", self.key))
    }

    pub fn set_buffer_wait(&mut self) {
        self.buffer_wait = true;
    }

    pub fn clear_buffer_wait(&mut self) {
        self.buffer_wait = false;
    }

    pub fn is_buffer_wait(&self) -> bool {
        self.buffer_wait
    }

    /// Opened by a submission that never got a buffer: no destination, no
    /// waiters and not forced.
    pub fn is_unused(&self) -> bool {
        self.state() == PssState::Created && self.waiters.is_empty() && !self.forced
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn set_forced(&mut self) {
        self.forced = true;
    }

    /// Park a worker on this RU.
    pub fn add_waiter(&mut self, record: WaitRecord) {
        self.waiters.push(record);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Wake every worker parked on this RU without committing a buffer.
    /// Returns how many were still listening. The buffer-wait flag follows
    /// the row's wait queue and is left alone.
    pub fn release_waiters(&mut self) -> usize {
        self.waiters
            .drain(..)
            .map(|record| record.wake(false))
            .filter(|delivered| *delivered)
            .count()
    }
}

/// Table of parity stripe status entries for one row.
#[derive(Debug, Default)]
pub struct PssTable {
    entries: HashMap<RuKey, ParityStripeStatus>,
}

impl PssTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the entry for `key`, creating it on first use.
    pub fn lookup_or_create(&mut self, key: RuKey) -> &mut ParityStripeStatus {
        self.entries
            .entry(key)
            .or_insert_with(|| ParityStripeStatus::new(key))
    }

    pub fn get(&self, key: RuKey) -> Option<&ParityStripeStatus> {
        self.entries.get(&key)
    }

    /// Entry that must exist; a missing one is an invariant violation.
    pub fn expect_mut(&mut self, key: RuKey) -> &mut ParityStripeStatus {
        self.entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("no parity stripe status for {}", key))
    }

    pub fn get_mut(&mut self, key: RuKey) -> Option<&mut ParityStripeStatus> {
        self.entries.get_mut(&key)
    }

    /// Drop the entry for an RU whose cycle has ended.
    pub fn retire(&mut self, key: RuKey) -> Option<ParityStripeStatus> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn sorted(&self) -> Vec<&ParityStripeStatus> {
        let mut all: Vec<_> = self.entries.values().collect();
        all.sort_by_key(|pss| pss.key);
        all
    }
}
