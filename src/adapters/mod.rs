//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Usage
//!
//! ```ignore
//! use raidrecon::adapters::MemoryDiskArray;
//! use raidrecon::domain::ports::DiskBackend;
//!
//! let disks = MemoryDiskArray::new(5, 1024, 512);
//! disks.fail_column(4)?;
//! disks.replace_column(4)?;
//! disks.write(4, 0, &rebuilt).await?;
//! ```

mod memory_disk;

pub use memory_disk::MemoryDiskArray;
