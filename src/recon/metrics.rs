//! Reconstruction pool metrics
//!
//! Counters and gauges for one row's buffer pool, labelled with the row id so
//! several pools can share a registry.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::error::Result;

/// Prometheus metrics for a reconstruction buffer pool.
#[derive(Debug, Clone)]
pub struct ReconMetrics {
    /// Buffers submitted by workers
    pub submissions: IntCounter,
    /// XOR accumulations performed
    pub xor_operations: IntCounter,
    /// Source buffers folded into destinations
    pub xor_sources: IntCounter,
    /// Submissions that had to wait for a buffer
    pub buffer_waits: IntCounter,
    /// Reconstruction units that became full
    pub full_buffers: IntCounter,
    /// Full buffers written back
    pub write_backs: IntCounter,
    /// Floating buffers currently free
    pub floating_available: IntGauge,
    /// Workers currently blocked on buffers
    pub blocked_workers: IntGauge,
}

impl ReconMetrics {
    /// Create unregistered metrics for `row`.
    pub fn new(row: usize) -> Result<Self> {
        let row = row.to_string();
        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(name, help).const_label("row", row.as_str()))
        };
        let gauge = |name: &str, help: &str| {
            IntGauge::with_opts(Opts::new(name, help).const_label("row", row.as_str()))
        };

        Ok(Self {
            submissions: counter(
                "raidrecon_submissions_total",
                "Reconstruction buffers submitted",
            )?,
            xor_operations: counter(
                "raidrecon_xor_operations_total",
                "Multi-way XOR accumulations performed",
            )?,
            xor_sources: counter(
                "raidrecon_xor_sources_total",
                "Source buffers folded into destinations",
            )?,
            buffer_waits: counter(
                "raidrecon_buffer_waits_total",
                "Submissions that blocked waiting for a buffer",
            )?,
            full_buffers: counter(
                "raidrecon_full_buffers_total",
                "Reconstruction units fully accumulated",
            )?,
            write_backs: counter(
                "raidrecon_write_backs_total",
                "Full buffers written back to the replacement disk",
            )?,
            floating_available: gauge(
                "raidrecon_floating_buffers_available",
                "Floating reconstruction buffers currently free",
            )?,
            blocked_workers: gauge(
                "raidrecon_blocked_workers",
                "Workers blocked waiting for a reconstruction buffer",
            )?,
        })
    }

    /// Register every metric on `registry`.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.submissions.clone()))?;
        registry.register(Box::new(self.xor_operations.clone()))?;
        registry.register(Box::new(self.xor_sources.clone()))?;
        registry.register(Box::new(self.buffer_waits.clone()))?;
        registry.register(Box::new(self.full_buffers.clone()))?;
        registry.register(Box::new(self.write_backs.clone()))?;
        registry.register(Box::new(self.floating_available.clone()))?;
        registry.register(Box::new(self.blocked_workers.clone()))?;
        Ok(())
    }
}
