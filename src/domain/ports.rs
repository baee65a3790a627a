//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the reconstruction core depends on. Infrastructure adapters
//! implement these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │                     DiskBackend                      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │                   MemoryDiskArray                    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Health of one column of the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnState {
    /// Readable and writable
    Optimal,
    /// Neither readable nor writable
    Failed,
    /// Replacement disk being rebuilt; writes only
    Rebuilding,
}

impl ColumnState {
    pub fn is_readable(&self) -> bool {
        matches!(self, ColumnState::Optimal)
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, ColumnState::Failed)
    }
}

impl fmt::Display for ColumnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnState::Optimal => write!(f, "optimal"),
            ColumnState::Failed => write!(f, "failed"),
            ColumnState::Rebuilding => write!(f, "rebuilding"),
        }
    }
}

// =============================================================================
// Disk Backend Port
// =============================================================================

/// Port for sector-addressed access to the columns of one RAID row.
#[async_trait]
pub trait DiskBackend: Send + Sync {
    /// Number of columns
    fn num_columns(&self) -> usize;

    /// Sector size in bytes
    fn bytes_per_sector(&self) -> usize;

    /// Current state of `column`
    fn column_state(&self, column: usize) -> Result<ColumnState>;

    /// Read `buf.len()` bytes starting at `sector` of `column`.
    async fn read(&self, column: usize, sector: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `sector` of `column`.
    async fn write(&self, column: usize, sector: u64, data: &[u8]) -> Result<()>;
}
