//! Simulation configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::disk_queue::DiskQueueConfig;
use crate::error::{Error, Result};
use crate::recon::{ReconGeometry, ReconPoolConfig};

/// Everything needed to simulate rebuilding one failed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Row id used in logs and metric labels
    pub row: usize,

    pub geometry: ReconGeometry,

    pub pool: ReconPoolConfig,

    /// Discipline of every surviving disk's request queue
    pub queue: DiskQueueConfig,

    /// Parity stripes in the row (one RU each)
    pub stripes: u64,

    /// Column to fail and rebuild
    pub failed_column: usize,

    /// How many RUs a worker may run ahead of the slowest one (0 = unlimited)
    pub head_separation_limit: u64,

    /// Foreground reads queued on each disk alongside every reconstruction read
    pub foreground_per_ru: usize,

    /// Stripes rebuilt through the forced path
    pub forced_stripes: Vec<u64>,

    /// Simulated latency per disk operation, in microseconds
    pub disk_latency_us: u64,

    /// Seed for the generated stripe contents and foreground offsets
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            row: 0,
            geometry: ReconGeometry::default(),
            pool: ReconPoolConfig::default(),
            queue: DiskQueueConfig::default(),
            stripes: 64,
            failed_column: 4,
            head_separation_limit: 4,
            foreground_per_ru: 1,
            forced_stripes: Vec::new(),
            disk_latency_us: 0,
            seed: 0x5eed,
        }
    }
}

impl SimulationConfig {
    /// Load a YAML configuration file. Missing fields take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading simulation config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Sectors on each disk
    pub fn sectors_per_column(&self) -> u64 {
        self.stripes * self.geometry.sectors_per_ru()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.pool.validate()?;
        self.queue.validate()?;

        if self.stripes == 0 {
            return Err(Error::InvalidConfig("stripes must be > 0".into()));
        }
        if self.failed_column >= self.geometry.num_columns {
            return Err(Error::InvalidConfig(format!(
                "failed_column {} is outside a {}-column row",
                self.failed_column, self.geometry.num_columns
            )));
        }
        if let Some(bad) = self.forced_stripes.iter().find(|&&s| s >= self.stripes) {
            return Err(Error::InvalidConfig(format!(
                "forced stripe {} is beyond the last stripe {}",
                bad,
                self.stripes - 1
            )));
        }
        Ok(())
    }
}
