//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the disks the
//!   reconstruction core reads from and writes to
//!
//! # Usage
//!
//! ```ignore
//! use raidrecon::domain::ports::DiskBackend;
//!
//! async fn read_unit<D: DiskBackend>(disks: &D, column: usize, sector: u64) -> Result<Vec<u8>> {
//!     let mut buf = vec![0u8; 64 * disks.bytes_per_sector()];
//!     disks.read(column, sector, &mut buf).await?;
//!     Ok(buf)
//! }
//! ```

pub mod ports;

pub use ports::{ColumnState, DiskBackend};
