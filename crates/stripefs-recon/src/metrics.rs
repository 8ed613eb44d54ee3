//! Reconstruction engine metrics

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters and gauges for the reconstruction engine
#[derive(Debug, Default)]
pub struct ReconMetrics {
    /// Block transmissions currently in progress (one per running task)
    xmits_in_progress: AtomicI64,
    /// Tasks accepted into the task pool
    tasks_submitted: AtomicU64,
    /// Tasks that ended in failure
    tasks_failed: AtomicU64,
    /// Decoded bytes handed to target streams
    bytes_reconstructed: AtomicU64,
}

impl ReconMetrics {
    /// Current transmits-in-progress gauge
    #[must_use]
    pub fn xmits_in_progress(&self) -> i64 {
        self.xmits_in_progress.load(Ordering::Relaxed)
    }

    /// Tasks accepted so far
    #[must_use]
    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted.load(Ordering::Relaxed)
    }

    /// Tasks failed so far
    #[must_use]
    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Decoded bytes shipped so far
    #[must_use]
    pub fn bytes_reconstructed(&self) -> u64 {
        self.bytes_reconstructed.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_tasks_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_reconstructed(&self, n: u64) {
        self.bytes_reconstructed.fetch_add(n, Ordering::Relaxed);
    }

    /// Mark one transmit in progress for as long as the guard lives.
    #[must_use]
    pub fn xmit_guard(self: &Arc<Self>) -> XmitGuard {
        self.xmits_in_progress.fetch_add(1, Ordering::Relaxed);
        XmitGuard {
            metrics: Arc::clone(self),
        }
    }

    /// Export metrics in Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self, node: &str) -> String {
        let mut out = String::with_capacity(1024);
        let gauges = [
            (
                "xmits_in_progress",
                "Block transmissions in progress",
                "gauge",
                self.xmits_in_progress() as f64,
            ),
            (
                "tasks_submitted_total",
                "Reconstruction tasks accepted",
                "counter",
                self.tasks_submitted() as f64,
            ),
            (
                "tasks_failed_total",
                "Reconstruction tasks failed",
                "counter",
                self.tasks_failed() as f64,
            ),
            (
                "bytes_reconstructed_total",
                "Decoded bytes handed to target streams",
                "counter",
                self.bytes_reconstructed() as f64,
            ),
        ];
        for (name, help, kind, value) in gauges {
            let _ = writeln!(out, "# HELP stripefs_recon_{name} {help}");
            let _ = writeln!(out, "# TYPE stripefs_recon_{name} {kind}");
            let _ = writeln!(out, "stripefs_recon_{name}{{node=\"{node}\"}} {value}");
        }
        out
    }
}

/// Scoped transmits-in-progress increment; decrements on drop, on every
/// exit path of the task holding it.
pub struct XmitGuard {
    metrics: Arc<ReconMetrics>,
}

impl Drop for XmitGuard {
    fn drop(&mut self) {
        self.metrics
            .xmits_in_progress
            .fetch_sub(1, Ordering::Relaxed);
    }
}
