//! Counters for `FT.INTERNAL_UPDATE` outcomes.
//!
//! A skipped record replies OK, so these counters are the only place the
//! discarded data shows up.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`UpdateStats`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStatsSnapshot {
    pub parse_failures: u64,
    pub process_failures: u64,
    pub skipped_entries: u64,
    pub applied: u64,
}

#[derive(Default, Debug)]
pub struct UpdateStats {
    parse_failures: AtomicU64,
    process_failures: AtomicU64,
    skipped_entries: AtomicU64,
    applied: AtomicU64,
}

impl UpdateStats {
    pub const fn new() -> Self {
        Self {
            parse_failures: AtomicU64::new(0),
            process_failures: AtomicU64::new(0),
            skipped_entries: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_failure(&self) {
        self.process_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UpdateStatsSnapshot {
        UpdateStatsSnapshot {
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            process_failures: self.process_failures.load(Ordering::Relaxed),
            skipped_entries: self.skipped_entries.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
        }
    }
}

impl UpdateStatsSnapshot {
    /// Render as space-separated `key=value` pairs.
    pub fn render(&self) -> String {
        format!(
            "ft_internal_update.parse_failures={} ft_internal_update.process_failures={} ft_internal_update.skipped_entries={} ft_internal_update.applied={}",
            self.parse_failures, self.process_failures, self.skipped_entries, self.applied,
        )
    }
}
