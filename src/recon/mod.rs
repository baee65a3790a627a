//! Reconstruction Buffer Manager
//!
//! Rebuilds the contents of a failed column of a parity-protected RAID row.
//! One worker per surviving column reads a reconstruction unit (RU) at a time
//! and submits it; the per-row pool XORs the contributions of every data
//! column into one buffer and queues it for write-back to the replacement
//! disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ReconBufferPool (per row)                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐    ┌──────────────┐    ┌───────────────────────────┐  │
//! │  │ BufferArena  │    │   PssTable   │    │   BufferWaitQueue         │  │
//! │  │ floating /   │    │ dest + xor   │    │   (blocked workers)       │  │
//! │  │ committed    │    │ queue per RU │    │                           │  │
//! │  └──────────────┘    └──────────────┘    └───────────────────────────┘  │
//! │         │                   │                         │                  │
//! │         └───────────────────┼─────────────────────────┘                  │
//! │                             │                                            │
//! │                   ┌─────────┴─────────┐                                  │
//! │                   │  FullBufferList   │───────▶ write-back consumer      │
//! │                   │ (offset ordered)  │                                  │
//! │                   └───────────────────┘                                  │
//! │                                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Buffers** (`buffer.rs`): reconstruction buffers, their types and the
//!   generation-checked arena that owns pool buffers.
//! - **XOR** (`xor.rs`): multi-way accumulation of up to eight sources.
//! - **Parity stripe status** (`pss.rs`): per-RU destination, XOR queue and
//!   RU waiters.
//! - **Wait queue** (`wait_queue.rs`): FIFO of workers blocked on an empty
//!   pool, woken through one-shot channels.
//! - **Full buffer list** (`full_list.rs`): completed RUs in failed-disk
//!   sector order, with a priority list for forced RUs.
//! - **Pool** (`pool.rs`): the submit / release / write-back protocol and
//!   deadlock detection.
//!
//! # Usage
//!
//! ```rust,ignore
//! use raidrecon::recon::{ReconBufferPool, ReconBuffer, RuKey, SubmitOutcome};
//!
//! let pool = ReconBufferPool::new(0, 4, geometry, ReconPoolConfig::default())?;
//! let mut buffer = ReconBuffer::exclusive(0, column, geometry.ru_bytes());
//!
//! loop {
//!     // read the RU into buffer.data_mut() ...
//!     buffer.set_target(RuKey::new(stripe_id, 0), offset);
//!     let mut use_committed = false;
//!     buffer = loop {
//!         match pool.submit(buffer, false, use_committed)? {
//!             SubmitOutcome::Accepted(returned) => break returned.unwrap(),
//!             SubmitOutcome::WouldBlock(returned, waiter) => {
//!                 use_committed = waiter.wait().await?.committed;
//!                 buffer = returned;
//!             }
//!         }
//!     };
//! }
//! ```

pub mod buffer;
pub mod full_list;
pub mod geometry;
pub mod metrics;
pub mod pool;
pub mod pss;
pub mod wait_queue;
pub mod xor;

#[cfg(test)]
mod proptest;

pub use buffer::{BufferHandle, BufferType, ReconBuffer, RuKey};
pub use geometry::{ReconGeometry, ReconPoolConfig, MAX_XOR_SOURCES};
pub use metrics::ReconMetrics;
pub use pool::{FullReconBuffer, PoolStats, PssStatus, ReconBufferPool, SubmitOutcome};
pub use pss::PssState;
pub use wait_queue::{BufferWaitEntry, BufferWake, BufferWaiter};
