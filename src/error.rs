//! Error types for the reconstruction core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconstructing a failed column
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Reconstruction Errors
    // =========================================================================
    /// Every surviving column of a row is blocked on buffers and nothing is
    /// waiting to be written back, so no buffer can ever be released.
    #[error(
        "Buffer wait deadlock in row {row}: {blocked} of {columns} columns blocked with no full buffers outstanding"
    )]
    BufferWaitDeadlock {
        row: usize,
        blocked: usize,
        columns: usize,
    },

    /// The pool side of a buffer wait went away before waking the worker
    #[error("Buffer waiter for row {row} column {column} was dropped without a wakeup")]
    WaiterDropped { row: usize, column: usize },

    /// Disk operation failed
    #[error("Disk operation on column {column} at sector {sector} failed: {reason}")]
    Disk {
        column: usize,
        sector: u64,
        reason: String,
    },

    /// Reconstructed data did not match the expected contents
    #[error("Verification failed for parity stripe {stripe_id} RU {ru}: {reason}")]
    Verification {
        stripe_id: u64,
        ru: u32,
        reason: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
