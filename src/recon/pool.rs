//! Reconstruction Buffer Pool
//!
//! Per-row context that coordinates the reconstruction workers of one RAID
//! row. Every surviving column has a worker that reads one reconstruction
//! unit (RU) at a time and submits it here; the pool folds the contributions
//! of all data columns into a single destination buffer per parity stripe
//! and hands finished buffers to the write-back consumer.
//!
//! # Workflow
//!
//! ```text
//! ┌──────────┐ submit ┌───────────────────────────────────────────────┐
//! │ column 0 │───────▶│                 row mutex                      │
//! ├──────────┤        │                                                │
//! │ column 1 │───────▶│  PSS table ──▶ xor ──▶ full list ──────────────┼──▶ write-back
//! ├──────────┤        │      │                                         │
//! │ column N │───────▶│      └──▶ floating / committed free lists      │
//! └──────────┘        │                 │                              │
//!      ▲              │        buffer wait queue (FIFO)                │
//!      └──── wake ────┤                                                │
//!                     └────────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! A single mutex guards the free lists, the PSS table, the wait queue and
//! the full buffer list of the row. The XOR runs with that lock held, so a
//! buffer handle observed under the lock keeps its identity and contents for
//! the whole critical section.
//!
//! # Deadlock
//!
//! A worker that cannot get a buffer parks on the wait queue. Columns that
//! have submitted their last contribution are retired with
//! [`ReconBufferPool::retire_column`] and workers held back outside the pool
//! are counted through [`ReconBufferPool::stall_counter`]. If the parked and
//! stalled workers account for every producer still running and no full
//! buffer is outstanding, nothing can ever release a buffer again; the pool
//! logs the status table and returns [`Error::BufferWaitDeadlock`].

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::buffer::{BufferArena, BufferHandle, BufferType, ReconBuffer, RuKey};
use super::full_list::{FullBufferList, FullEntry};
use super::geometry::{ReconGeometry, ReconPoolConfig, MAX_XOR_SOURCES};
use super::metrics::ReconMetrics;
use super::pss::{PssState, PssTable};
use super::wait_queue::{BufferWaitEntry, BufferWaitQueue, BufferWaiter, WaitRecord};
use super::xor::{xor_into, XorSources};
use crate::error::{Error, Result};

// =============================================================================
// Public Types
// =============================================================================

/// Result of a submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The contribution was absorbed. Carries the caller's buffer back when
    /// it was not kept by the pool.
    Accepted(Option<ReconBuffer>),

    /// No buffer was available. The caller's buffer comes back untouched;
    /// await the waiter, then resubmit with `use_committed = wake.committed`.
    WouldBlock(ReconBuffer, BufferWaiter),
}

/// A completed reconstruction unit checked out for write-back.
///
/// Must be returned with [`ReconBufferPool::complete_write_back`].
#[derive(Debug)]
pub struct FullReconBuffer {
    handle: BufferHandle,
    buffer: ReconBuffer,
}

impl FullReconBuffer {
    pub fn key(&self) -> RuKey {
        self.buffer.key
    }

    pub fn failed_disk_sector_offset(&self) -> u64 {
        self.buffer.failed_disk_sector_offset
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    pub fn kind(&self) -> BufferType {
        self.buffer.kind()
    }

    pub fn buffer(&self) -> &ReconBuffer {
        &self.buffer
    }
}

/// Snapshot of one parity stripe status entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PssStatus {
    pub key: RuKey,
    pub state: PssState,
    pub dest_count: Option<usize>,
    pub queued: usize,
    pub ru_waiters: usize,
    pub forced: bool,
}

impl fmt::Display for PssStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} count={} queued={} ru_waiters={}{}",
            self.key,
            self.state,
            self.dest_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".into()),
            self.queued,
            self.ru_waiters,
            if self.forced { " forced" } else { "" }
        )
    }
}

/// Pool occupancy counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub floating_free: usize,
    pub committed: usize,
    pub blocked_workers: usize,
    pub active_rus: usize,
    pub full_queued: usize,
    pub full_outstanding: usize,
    pub resident_buffers: usize,
    pub active_producers: usize,
    pub stalled_producers: usize,
}

// =============================================================================
// Row State
// =============================================================================

#[derive(Debug)]
struct RowState {
    arena: BufferArena,
    floating: Vec<BufferHandle>,
    committed: VecDeque<BufferHandle>,
    pss: PssTable,
    wait_queue: BufferWaitQueue,
    full: FullBufferList,
    /// Workers parked on the wait queue
    blocked: usize,
    /// Full buffers queued or checked out for write-back
    full_outstanding: usize,
    /// Columns that will submit nothing more
    retired: HashSet<usize>,
}

// =============================================================================
// ReconBufferPool
// =============================================================================

/// Reconstruction buffer manager for one RAID row.
#[derive(Debug)]
pub struct ReconBufferPool {
    row: usize,
    failed_column: usize,
    geometry: ReconGeometry,
    config: ReconPoolConfig,
    state: Mutex<RowState>,
    full_ready: Notify,
    /// Producers held back outside the pool
    stalled: Arc<AtomicUsize>,
    metrics: ReconMetrics,
}

impl ReconBufferPool {
    /// Create the pool for `row`, rebuilding `failed_column`.
    pub fn new(
        row: usize,
        failed_column: usize,
        geometry: ReconGeometry,
        config: ReconPoolConfig,
    ) -> Result<Self> {
        geometry.validate()?;
        config.validate()?;
        if failed_column >= geometry.num_columns {
            return Err(Error::InvalidConfig(format!(
                "failed column {} is outside a {}-column row",
                failed_column, geometry.num_columns
            )));
        }

        let ru_bytes = geometry.ru_bytes();
        let mut arena = BufferArena::new();
        let floating = (0..config.floating_buffers)
            .map(|_| arena.insert(ReconBuffer::floating(row, ru_bytes)))
            .collect::<Vec<_>>();

        let metrics = ReconMetrics::new(row)?;
        metrics.floating_available.set(floating.len() as i64);

        info!(
            "Created reconstruction pool for row {} (failed column {}, {} x {} byte buffers)",
            row, failed_column, config.floating_buffers, ru_bytes
        );

        Ok(Self {
            row,
            failed_column,
            geometry,
            config,
            state: Mutex::new(RowState {
                arena,
                floating,
                committed: VecDeque::new(),
                pss: PssTable::new(),
                wait_queue: BufferWaitQueue::new(),
                full: FullBufferList::new(),
                blocked: 0,
                full_outstanding: 0,
                retired: HashSet::new(),
            }),
            full_ready: Notify::new(),
            stalled: Arc::new(AtomicUsize::new(0)),
            metrics,
        })
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn failed_column(&self) -> usize {
        self.failed_column
    }

    pub fn geometry(&self) -> &ReconGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &ReconPoolConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ReconMetrics {
        &self.metrics
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit one column's contribution to an RU.
    ///
    /// `keep_it` hands the buffer itself to the pool (forced reconstruction);
    /// otherwise the contents are absorbed and the buffer is returned.
    /// `use_committed` must be set after a wake with `committed = true`.
    pub fn submit(
        &self,
        buffer: ReconBuffer,
        keep_it: bool,
        use_committed: bool,
    ) -> Result<SubmitOutcome> {
        let mut guard = self.state.lock();
        let outcome = self.submit_locked(&mut guard, buffer, keep_it, use_committed);
        self.refresh_gauges(&guard);
        outcome
    }

    fn submit_locked(
        &self,
        state: &mut RowState,
        mut buffer: ReconBuffer,
        keep_it: bool,
        use_committed: bool,
    ) -> Result<SubmitOutcome> {
        assert_eq!(
            keep_it,
            buffer.kind() == BufferType::Forced,
            "only forced buffers may be kept by the pool (got {} buffer, keep_it={})",
            buffer.kind(),
            keep_it
        );
        assert_eq!(
            buffer.len(),
            self.geometry.ru_bytes(),
            "submitted buffer does not span one reconstruction unit"
        );

        self.metrics.submissions.inc();
        let key = buffer.key;
        let num_data = self.geometry.num_data_columns;
        let pss = state.pss.lookup_or_create(key);

        // Enough buffers queued to XOR right away: no pool buffer needed.
        if let Some(dest) = pss.dest() {
            let dest_count = state.arena.get(dest).count;
            let queued = pss.xor_buf_count();
            if queued == self.config.accumulate_threshold - 1 || dest_count + queued + 1 == num_data
            {
                let sources = pss.drain_pending();
                debug!(
                    "RECON: row {} col {} invoking a {}-way XOR for {}",
                    self.row,
                    buffer.column,
                    sources.len() + 1,
                    key
                );
                self.accumulate(state, dest, sources, Some(buffer.data()));
                self.check_for_full(state, key);

                if use_committed {
                    let committed = self.pop_committed(state);
                    self.release_floating(state, committed);
                }
                return Ok(SubmitOutcome::Accepted(if keep_it {
                    None
                } else {
                    Some(buffer)
                }));
            }
        }

        let (handle, returned) = if keep_it {
            (state.arena.insert(buffer), None)
        } else {
            let target = if use_committed {
                Some(self.pop_committed(state))
            } else {
                state.floating.pop()
            };
            match target {
                Some(handle) => {
                    state
                        .arena
                        .get_mut(handle)
                        .adopt(&mut buffer, self.failed_column);
                    (handle, Some(buffer))
                }
                None => return self.block(state, buffer),
            }
        };
        debug!("RECON: row {} acquired {} for {}", self.row, handle, key);

        let pss = state.pss.expect_mut(key);
        if pss.install(handle) {
            debug!("RECON: {} installed as destination for {}", handle, key);
        }
        state.arena.get_mut(handle).count = 1;
        self.check_for_full(state, key);

        Ok(SubmitOutcome::Accepted(returned))
    }

    /// Park the submitter, or report deadlock if nobody could ever wake it.
    fn block(&self, state: &mut RowState, buffer: ReconBuffer) -> Result<SubmitOutcome> {
        let key = buffer.key;

        if self.is_deadlocked(state, state.blocked + 1) {
            // Drop the entry this submission opened before reporting
            if state.pss.get(key).is_some_and(|pss| pss.is_unused()) {
                state.pss.retire(key);
            }
            return Err(self.deadlock(state, state.blocked + 1));
        }

        state.blocked += 1;
        state.pss.expect_mut(key).set_buffer_wait();
        let (record, waiter) = WaitRecord::new(BufferWaitEntry {
            row: self.row,
            column: buffer.column,
            key,
        });
        state.wait_queue.push(record);
        self.metrics.buffer_waits.inc();

        warn!(
            "RECON: row {} col {} failed to acquire a floating buffer for {} ({} blocked)",
            self.row, buffer.column, key, state.blocked
        );
        Ok(SubmitOutcome::WouldBlock(buffer, waiter))
    }

    fn active_producers(&self, state: &RowState) -> usize {
        self.geometry.surviving_columns() - state.retired.len()
    }

    /// `blocked` parked workers plus the stalled ones cover every active
    /// producer, and no write-back will return a buffer.
    fn is_deadlocked(&self, state: &RowState, blocked: usize) -> bool {
        let stalled = self.stalled.load(Ordering::SeqCst);
        blocked > 0
            && blocked + stalled >= self.active_producers(state)
            && state.full_outstanding == 0
    }

    fn deadlock(&self, state: &RowState, blocked: usize) -> Error {
        error!(
            "Buffer wait deadlock detected in row {}: {} blocked and {} stalled of {} active producers",
            self.row,
            blocked,
            self.stalled.load(Ordering::SeqCst),
            self.active_producers(state)
        );
        for line in Self::status_rows(state) {
            error!("  {}", line);
        }
        Error::BufferWaitDeadlock {
            row: self.row,
            blocked,
            columns: self.geometry.num_columns,
        }
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Shared count of producers held back by something other than the pool,
    /// such as head separation. Increment while a producer is held.
    pub fn stall_counter(&self) -> Arc<AtomicUsize> {
        self.stalled.clone()
    }

    /// Re-run deadlock detection after a producer stalled outside the pool.
    pub fn check_deadlock(&self) -> Result<()> {
        let state = self.state.lock();
        if self.is_deadlocked(&state, state.blocked) {
            return Err(self.deadlock(&state, state.blocked));
        }
        Ok(())
    }

    /// `column` has submitted its last contribution. Retiring a column twice
    /// is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `column` is the failed column or outside the row.
    pub fn retire_column(&self, column: usize) -> Result<()> {
        assert!(
            column < self.geometry.num_columns && column != self.failed_column,
            "row {}: column {} is not a surviving column",
            self.row,
            column
        );
        let mut state = self.state.lock();
        if !state.retired.insert(column) {
            return Ok(());
        }
        debug!(
            "RECON: row {} col {} retired ({} producers left, {} blocked)",
            self.row,
            column,
            self.active_producers(&state),
            state.blocked
        );
        if self.is_deadlocked(&state, state.blocked) {
            return Err(self.deadlock(&state, state.blocked));
        }
        Ok(())
    }

    fn pop_committed(&self, state: &mut RowState) -> BufferHandle {
        let handle = state
            .committed
            .pop_front()
            .unwrap_or_else(|| panic!("row {}: no committed buffer to consume", self.row));
        state.arena.get_mut(handle).set_kind(BufferType::Floating);
        handle
    }

    // =========================================================================
    // Accumulation
    // =========================================================================

    /// XOR the queued buffers (and the submitter's data) into the
    /// destination, then release the queued buffers.
    fn accumulate(
        &self,
        state: &mut RowState,
        dest: BufferHandle,
        queued: SmallVec<[BufferHandle; MAX_XOR_SOURCES]>,
        submitter: Option<&[u8]>,
    ) {
        let mut dest_data = state.arena.get_mut(dest).take_data();
        {
            let mut sources: XorSources<'_> =
                queued.iter().map(|h| state.arena.get(*h).data()).collect();
            if let Some(data) = submitter {
                sources.push(data);
            }
            xor_into(&mut dest_data, &sources);
        }

        let consumed = queued.len() + usize::from(submitter.is_some());
        let num_data = self.geometry.num_data_columns;
        let target = state.arena.get_mut(dest);
        target.put_data(dest_data);
        target.count += consumed;
        assert!(
            target.count <= num_data,
            "{}: contribution count {} exceeds {} data columns",
            target.key,
            target.count,
            num_data
        );

        self.metrics.xor_operations.inc();
        self.metrics.xor_sources.inc_by(consumed as u64);

        for handle in queued {
            match state.arena.get(handle).kind() {
                BufferType::Floating => self.release_floating(state, handle),
                BufferType::Forced => {
                    state.arena.remove(handle);
                }
                other => panic!("unexpected {} buffer {} consumed by xor", other, handle),
            }
        }
    }

    /// Move a full destination to the write-back lists and retire its PSS.
    fn check_for_full(&self, state: &mut RowState, key: RuKey) {
        let num_data = self.geometry.num_data_columns;
        let pss = state.pss.expect_mut(key);
        let Some(dest) = pss.dest() else {
            return;
        };
        let buffer = state.arena.get(dest);
        if buffer.count < num_data {
            return;
        }

        let entry = FullEntry {
            handle: pss.take_full_dest(),
            failed_disk_sector_offset: buffer.failed_disk_sector_offset,
        };
        let forced = pss.is_forced();
        let woken = pss.release_waiters();
        state.pss.retire(key);

        if forced {
            state.full.push_priority(entry);
        } else {
            state.full.insert(entry);
        }
        state.full_outstanding += 1;
        self.metrics.full_buffers.inc();
        self.full_ready.notify_one();

        debug!(
            "RECON: buffer for {} has filled (offset {}, {} RU waiters released)",
            key, entry.failed_disk_sector_offset, woken
        );
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Return a floating buffer. If anyone is waiting, it is committed to
    /// the oldest waiter instead of going back on the free list.
    fn release_floating(&self, state: &mut RowState, handle: BufferHandle) {
        {
            let buffer = state.arena.get_mut(handle);
            buffer.count = 0;
            buffer.set_kind(BufferType::Floating);
        }

        while let Some(record) = state.wait_queue.pop_oldest() {
            state.blocked -= 1;
            let entry = record.entry;
            Self::sync_buffer_wait(state, entry.key);
            if record.wake(true) {
                state.arena.get_mut(handle).set_kind(BufferType::Committed);
                state.committed.push_back(handle);
                debug!(
                    "RECON: committed {} to row {} col {} for {}",
                    handle, entry.row, entry.column, entry.key
                );
                return;
            }
        }

        state.floating.push(handle);
    }

    /// The RU stays in buffer wait while any submission for it is queued.
    fn sync_buffer_wait(state: &mut RowState, key: RuKey) {
        let waiting = state.wait_queue.has_waiter_for(key);
        if let Some(pss) = state.pss.get_mut(key) {
            if waiting {
                pss.set_buffer_wait();
            } else {
                pss.clear_buffer_wait();
            }
        }
    }

    /// Wake every worker parked on `key`'s RU without committing a buffer.
    pub fn release_buffer_waiters(&self, key: RuKey) -> usize {
        let mut state = self.state.lock();
        state
            .pss
            .get_mut(key)
            .map(|pss| pss.release_waiters())
            .unwrap_or(0)
    }

    /// Wake the first worker blocked on a buffer for `key`, without
    /// committing a buffer to it. Returns whether one was found.
    pub fn release_buffer_waiter(&self, key: RuKey) -> bool {
        let mut guard = self.state.lock();
        let released = Self::release_buffer_waiter_locked(&mut guard, key);
        self.refresh_gauges(&guard);
        released
    }

    fn release_buffer_waiter_locked(state: &mut RowState, key: RuKey) -> bool {
        match state.wait_queue.remove_first_for(key) {
            Some(record) => {
                state.blocked -= 1;
                Self::sync_buffer_wait(state, key);
                debug!(
                    "RECON: releasing waiter row {} col {} for {}",
                    record.entry.row, record.entry.column, key
                );
                record.wake(false);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Forced Reconstruction
    // =========================================================================

    /// Administrative path: reconstruct an RU now with a buffer allocated
    /// outside the pool.
    ///
    /// The RU's full buffer goes to the priority list and every worker
    /// waiting on this RU is woken, since the forced buffer removes the need
    /// to wait for a pool buffer.
    pub fn force_reconstruction(&self, buffer: ReconBuffer) -> Result<()> {
        let key = buffer.key;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let pss = state.pss.lookup_or_create(key);
        pss.set_forced();
        let woken = pss.release_waiters();
        let global = Self::release_buffer_waiter_locked(state, key);
        info!(
            "Forcing reconstruction of {} in row {} ({} RU waiters, {} buffer waiter released)",
            key,
            self.row,
            woken,
            usize::from(global)
        );

        let outcome = self.submit_locked(state, buffer, true, false);
        self.refresh_gauges(state);
        match outcome? {
            SubmitOutcome::Accepted(_) => Ok(()),
            SubmitOutcome::WouldBlock(..) => Err(Error::Internal(format!(
                "forced submission for {} blocked",
                key
            ))),
        }
    }

    /// Park `column` on `key`'s RU if a submission for it is waiting on a
    /// buffer. Returns `None` when the RU is not in buffer wait.
    pub fn wait_for_ru(&self, column: usize, key: RuKey) -> Option<BufferWaiter> {
        let mut state = self.state.lock();
        let pss = state.pss.get_mut(key)?;
        if pss.state() != PssState::BufferWaitPending {
            return None;
        }
        let (record, waiter) = WaitRecord::new(BufferWaitEntry {
            row: self.row,
            column,
            key,
        });
        pss.add_waiter(record);
        Some(waiter)
    }

    // =========================================================================
    // Write-back
    // =========================================================================

    /// Next buffer to write: priority list first, then lowest offset.
    pub fn get_full_buffer(&self) -> Option<FullReconBuffer> {
        let mut state = self.state.lock();
        let entry = state.full.pop()?;
        let buffer = state.arena.check_out(entry.handle);
        Some(FullReconBuffer {
            handle: entry.handle,
            buffer,
        })
    }

    /// Wait until a full buffer is available.
    pub async fn next_full_buffer(&self) -> FullReconBuffer {
        loop {
            if let Some(full) = self.get_full_buffer() {
                return full;
            }
            self.full_ready.notified().await;
        }
    }

    /// Check out every queued full buffer at once, in write-back order.
    pub fn take_full_buffers(&self) -> Vec<FullReconBuffer> {
        let mut state = self.state.lock();
        let mut batch = Vec::with_capacity(state.full.len());
        while let Some(entry) = state.full.pop() {
            let buffer = state.arena.check_out(entry.handle);
            batch.push(FullReconBuffer {
                handle: entry.handle,
                buffer,
            });
        }
        batch
    }

    /// Wait for at least one full buffer, then take all of them.
    pub async fn next_full_batch(&self) -> Vec<FullReconBuffer> {
        loop {
            let batch = self.take_full_buffers();
            if !batch.is_empty() {
                return batch;
            }
            self.full_ready.notified().await;
        }
    }

    /// Return a buffer once its contents are on the replacement disk.
    pub fn complete_write_back(&self, full: FullReconBuffer) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        assert!(
            state.full_outstanding > 0,
            "row {}: write-back completed with no full buffers outstanding",
            self.row
        );
        state.full_outstanding -= 1;

        let FullReconBuffer { handle, buffer } = full;
        debug!(
            "RECON: wrote back {} at offset {}",
            buffer.key, buffer.failed_disk_sector_offset
        );
        match buffer.kind() {
            BufferType::Floating => {
                state.arena.check_in(handle, buffer);
                self.release_floating(state, handle);
            }
            BufferType::Forced => state.arena.discard_checked_out(handle),
            other => panic!("unexpected {} buffer {} written back", other, handle),
        }

        self.metrics.write_backs.inc();
        self.refresh_gauges(state);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            floating_free: state.floating.len(),
            committed: state.committed.len(),
            blocked_workers: state.blocked,
            active_rus: state.pss.len(),
            full_queued: state.full.len(),
            full_outstanding: state.full_outstanding,
            resident_buffers: state.arena.len(),
            active_producers: self.active_producers(&state),
            stalled_producers: self.stalled.load(Ordering::SeqCst),
        }
    }

    /// True when nothing is in flight: no active RU, no waiter, nothing to
    /// write back.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.pss.is_empty()
            && state.wait_queue.is_empty()
            && state.full_outstanding == 0
            && state.committed.is_empty()
    }

    /// Per-stripe status, in key order.
    pub fn status_table(&self) -> Vec<PssStatus> {
        let state = self.state.lock();
        Self::status_snapshot(&state)
    }

    /// Log the per-stripe status table.
    pub fn log_status_table(&self) {
        let state = self.state.lock();
        info!(
            "Row {} status: {} active RUs, {} blocked, {} full outstanding",
            self.row,
            state.pss.len(),
            state.blocked,
            state.full_outstanding
        );
        for line in Self::status_rows(&state) {
            info!("  {}", line);
        }
    }

    fn status_snapshot(state: &RowState) -> Vec<PssStatus> {
        state
            .pss
            .sorted()
            .into_iter()
            .map(|pss| PssStatus {
                key: pss.key,
                state: pss.state(),
                dest_count: pss.dest().map(|h| state.arena.get(h).count),
                queued: pss.xor_buf_count(),
                ru_waiters: pss.waiter_count(),
                forced: pss.is_forced(),
            })
            .collect()
    }

    fn status_rows(state: &RowState) -> Vec<String> {
        let mut rows: Vec<String> = Self::status_snapshot(state)
            .iter()
            .map(|s| s.to_string())
            .collect();
        for entry in state.wait_queue.entries() {
            rows.push(format!(
                "waiting: row {} col {} on {}",
                entry.row, entry.column, entry.key
            ));
        }
        rows
    }

    /// Check that every resident buffer sits in exactly one place.
    ///
    /// # Panics
    ///
    /// Panics on the first violation.
    pub fn verify_invariants(&self) {
        let state = self.state.lock();
        let num_data = self.geometry.num_data_columns;
        let mut seen = HashSet::new();
        let mut visit = |handle: BufferHandle, place: &str| {
            assert!(
                state.arena.contains(handle),
                "{} holds a handle {} that is not resident",
                place,
                handle
            );
            assert!(seen.insert(handle), "{} reachable from two lists", handle);
        };

        for &h in &state.floating {
            visit(h, "floating list");
        }
        for &h in &state.committed {
            visit(h, "committed list");
        }
        for h in state.full.handles() {
            visit(h, "full list");
        }
        for pss in state.pss.sorted() {
            if let Some(dest) = pss.dest() {
                visit(dest, "parity stripe destination");
                let count = state.arena.get(dest).count;
                assert!(
                    count + pss.xor_buf_count() <= num_data,
                    "{}: {} contributions plus {} queued exceed {} data columns",
                    pss.key,
                    count,
                    pss.xor_buf_count(),
                    num_data
                );
            } else {
                assert!(pss.pending().is_empty(), "{}: queued buffers without a destination", pss.key);
            }
            for &h in pss.pending() {
                visit(h, "parity stripe xor queue");
            }
        }
        drop(visit);

        assert_eq!(
            seen.len(),
            state.arena.len(),
            "arena holds buffers not reachable from any list"
        );
        for &h in &state.floating {
            assert_eq!(state.arena.get(h).kind(), BufferType::Floating);
        }
        for &h in &state.committed {
            assert_eq!(state.arena.get(h).kind(), BufferType::Committed);
        }
        for pss in state.pss.sorted() {
            assert_eq!(
                pss.is_buffer_wait(),
                state.wait_queue.has_waiter_for(pss.key),
                "{}: buffer-wait flag out of step with the wait queue",
                pss.key
            );
        }
        assert_eq!(state.blocked, state.wait_queue.len());
    }

    fn refresh_gauges(&self, state: &RowState) {
        self.metrics
            .floating_available
            .set(state.floating.len() as i64);
        self.metrics.blocked_workers.set(state.blocked as i64);
    }
}

// =============================================================================
// Tests
// =============================================================================
