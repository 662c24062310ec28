use std::time::Duration;

use sysinfo::System;
use tracing::warn;

/// Resident-set supervisor for the baseline build.
///
/// Large workbooks can hold tens of millions of cells in flight; the build
/// pauses when the process RSS exceeds the configured budget and halts (with
/// progress persisted) when the pause does not help.
pub struct MemoryMonitor {
    limit_bytes: u64,
}

/// How long the builder pauses to let in-flight buffers drain before
/// re-checking the budget.
pub const RELIEF_PAUSE: Duration = Duration::from_secs(10);

impl MemoryMonitor {
    pub fn new(limit_mb: u64) -> Self {
        MemoryMonitor {
            limit_bytes: limit_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Current RSS in bytes (best-effort; platform-dependent).
    pub fn rss_bytes() -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = System::new();
        system.refresh_processes();
        system.process(pid).map(|process| process.memory())
    }

    /// `Some(rss)` when the process is over budget.
    pub fn over_budget(&self) -> Option<u64> {
        let rss = Self::rss_bytes()?;
        if rss > self.limit_bytes {
            warn!(
                rss_mb = rss / (1024 * 1024),
                limit_mb = self.limit_bytes / (1024 * 1024),
                "memory budget exceeded"
            );
            Some(rss)
        } else {
            None
        }
    }
}
