//! raidrecon - Parity Reconstruction Core for Software RAID
//!
//! Rebuilds a failed column of a parity-protected RAID row onto a
//! replacement disk. Surviving columns are read one reconstruction unit (RU)
//! at a time through per-disk seek-ordered request queues; a per-row buffer
//! pool XORs the contributions into a single buffer per parity stripe and
//! releases completed buffers to a write-back consumer in failed-disk order.
//!
//! # Architecture
//!
//! ```text
//! Disk Queues (SSTF/SCAN/CSCAN/FIFO) → Reconstruction Buffer Pool → Write-back
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`disk_queue`] - Per-disk request scheduling
//! - [`domain`] - Domain ports
//! - [`error`] - Error types
//! - [`recon`] - Reconstruction buffer manager
//! - [`simulator`] - End-to-end rebuild simulation

pub mod adapters;
pub mod disk_queue;
pub mod domain;
pub mod error;
pub mod recon;
pub mod simulator;

// Re-export commonly used types
pub use disk_queue::{
    DiskQueue, DiskQueueConfig, DiskQueueEntry, DiskRequestQueue, Priority, QueueDiscipline,
};
pub use error::{Error, Result};
pub use recon::{
    FullReconBuffer, ReconBuffer, ReconBufferPool, ReconGeometry, ReconPoolConfig, RuKey,
    SubmitOutcome,
};
pub use simulator::{SimReport, SimulationConfig, Simulator};
