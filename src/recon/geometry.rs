//! Row geometry and buffer pool configuration
//!
//! The layout engine that maps stripes to columns lives outside this crate;
//! it hands the reconstruction core the handful of numbers below.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest number of buffers that may be queued on one parity stripe
/// waiting for an XOR.
pub const MAX_XOR_SOURCES: usize = 8;

/// Default sector size in bytes
pub const DEFAULT_BYTES_PER_SECTOR: usize = 512;

// =============================================================================
// Geometry
// =============================================================================

/// Shape of one RAID row as seen by the reconstruction core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconGeometry {
    /// Columns in the row, including the failed one
    pub num_columns: usize,

    /// Contributions required to rebuild one reconstruction unit
    pub num_data_columns: usize,

    /// Sectors per stripe unit
    pub sectors_per_stripe_unit: u64,

    /// Stripe units per reconstruction unit
    pub stripe_units_per_ru: u64,

    /// Bytes per sector
    pub bytes_per_sector: usize,
}

impl Default for ReconGeometry {
    fn default() -> Self {
        // 4+1 RAID-5 row with 32KB stripe units, one SU per RU
        Self {
            num_columns: 5,
            num_data_columns: 4,
            sectors_per_stripe_unit: 64,
            stripe_units_per_ru: 1,
            bytes_per_sector: DEFAULT_BYTES_PER_SECTOR,
        }
    }
}

impl ReconGeometry {
    /// Sectors covered by one reconstruction unit
    pub fn sectors_per_ru(&self) -> u64 {
        self.sectors_per_stripe_unit * self.stripe_units_per_ru
    }

    /// Size of a reconstruction buffer in bytes
    pub fn ru_bytes(&self) -> usize {
        self.sectors_per_ru() as usize * self.bytes_per_sector
    }

    /// Number of workers that must be blocked before a row is deadlocked
    pub fn surviving_columns(&self) -> usize {
        self.num_columns.saturating_sub(1)
    }

    /// Validate geometry
    pub fn validate(&self) -> Result<()> {
        if self.num_columns < 2 {
            return Err(Error::InvalidConfig("num_columns must be >= 2".into()));
        }
        if self.num_data_columns == 0 {
            return Err(Error::InvalidConfig("num_data_columns must be > 0".into()));
        }
        if self.num_data_columns > self.surviving_columns() {
            return Err(Error::InvalidConfig(format!(
                "num_data_columns ({}) cannot exceed surviving columns ({})",
                self.num_data_columns,
                self.surviving_columns()
            )));
        }
        if self.sectors_per_stripe_unit == 0 || self.stripe_units_per_ru == 0 {
            return Err(Error::InvalidConfig(
                "reconstruction unit must cover at least one sector".into(),
            ));
        }
        if self.bytes_per_sector == 0 {
            return Err(Error::InvalidConfig("bytes_per_sector must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Configuration for a per-row reconstruction buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconPoolConfig {
    /// Number of floating buffers allocated up front
    pub floating_buffers: usize,

    /// Queued buffers that trigger an XOR (1 = XOR on every arrival)
    pub accumulate_threshold: usize,
}

impl Default for ReconPoolConfig {
    fn default() -> Self {
        Self {
            floating_buffers: 8,
            accumulate_threshold: 1,
        }
    }
}

impl ReconPoolConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.floating_buffers == 0 {
            return Err(Error::InvalidConfig("floating_buffers must be > 0".into()));
        }
        if self.accumulate_threshold == 0 || self.accumulate_threshold > MAX_XOR_SOURCES {
            return Err(Error::InvalidConfig(format!(
                "accumulate_threshold must be in 1..={}",
                MAX_XOR_SOURCES
            )));
        }
        Ok(())
    }
}
