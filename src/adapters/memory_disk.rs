//! In-Memory Disk Array Adapter
//!
//! Implements the `DiskBackend` port over byte vectors. Used by the
//! reconstruction simulator and by tests; an optional per-operation latency
//! makes workers interleave the way they would against real disks.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::ports::{ColumnState, DiskBackend};
use crate::error::{Error, Result};

#[derive(Debug)]
struct MemoryColumn {
    state: ColumnState,
    data: Vec<u8>,
}

/// A row of in-memory disks.
#[derive(Debug)]
pub struct MemoryDiskArray {
    bytes_per_sector: usize,
    sectors_per_column: u64,
    columns: Vec<RwLock<MemoryColumn>>,
    latency: Option<Duration>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryDiskArray {
    /// Create `num_columns` zeroed, optimal disks.
    pub fn new(num_columns: usize, sectors_per_column: u64, bytes_per_sector: usize) -> Self {
        let bytes = sectors_per_column as usize * bytes_per_sector;
        let columns = (0..num_columns)
            .map(|_| {
                RwLock::new(MemoryColumn {
                    state: ColumnState::Optimal,
                    data: vec![0u8; bytes],
                })
            })
            .collect();

        Self {
            bytes_per_sector,
            sectors_per_column,
            columns,
            latency: None,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Delay every read and write by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn sectors_per_column(&self) -> u64 {
        self.sectors_per_column
    }

    fn column(&self, column: usize) -> Result<&RwLock<MemoryColumn>> {
        self.columns.get(column).ok_or_else(|| Error::Disk {
            column,
            sector: 0,
            reason: format!("no such column (array has {})", self.columns.len()),
        })
    }

    fn byte_range(&self, column: usize, sector: u64, len: usize) -> Result<Range<usize>> {
        let start = sector as usize * self.bytes_per_sector;
        let end = start + len;
        let capacity = self.sectors_per_column as usize * self.bytes_per_sector;
        if end > capacity {
            return Err(Error::Disk {
                column,
                sector,
                reason: format!("{} bytes past end of a {} byte disk", len, capacity),
            });
        }
        Ok(start..end)
    }

    /// Store `data` at `sector` regardless of column state.
    pub fn fill(&self, column: usize, sector: u64, data: &[u8]) -> Result<()> {
        let range = self.byte_range(column, sector, data.len())?;
        self.column(column)?.write().data[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy of a column's full contents, regardless of state.
    pub fn snapshot(&self, column: usize) -> Result<Vec<u8>> {
        Ok(self.column(column)?.read().data.clone())
    }

    pub fn set_state(&self, column: usize, state: ColumnState) -> Result<()> {
        let mut disk = self.column(column)?.write();
        debug!("Column {} {} -> {}", column, disk.state, state);
        disk.state = state;
        Ok(())
    }

    /// Mark a column failed.
    pub fn fail_column(&self, column: usize) -> Result<()> {
        info!("Failing column {}", column);
        self.set_state(column, ColumnState::Failed)
    }

    /// Swap in a blank replacement disk for `column` and start rebuilding it.
    pub fn replace_column(&self, column: usize) -> Result<()> {
        let mut disk = self.column(column)?.write();
        disk.data.fill(0);
        disk.state = ColumnState::Rebuilding;
        info!("Replacement disk installed for column {}", column);
        Ok(())
    }

    /// Number of completed (reads, writes)
    pub fn io_counts(&self) -> (u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
        )
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DiskBackend for MemoryDiskArray {
    fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn bytes_per_sector(&self) -> usize {
        self.bytes_per_sector
    }

    fn column_state(&self, column: usize) -> Result<ColumnState> {
        Ok(self.column(column)?.read().state)
    }

    async fn read(&self, column: usize, sector: u64, buf: &mut [u8]) -> Result<()> {
        self.delay().await;
        let range = self.byte_range(column, sector, buf.len())?;
        let disk = self.column(column)?.read();
        if !disk.state.is_readable() {
            return Err(Error::Disk {
                column,
                sector,
                reason: format!("read from {} disk", disk.state),
            });
        }
        buf.copy_from_slice(&disk.data[range]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write(&self, column: usize, sector: u64, data: &[u8]) -> Result<()> {
        self.delay().await;
        let range = self.byte_range(column, sector, data.len())?;
        let mut disk = self.column(column)?.write();
        if !disk.state.is_writable() {
            return Err(Error::Disk {
                column,
                sector,
                reason: format!("write to {} disk", disk.state),
            });
        }
        disk.data[range].copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
