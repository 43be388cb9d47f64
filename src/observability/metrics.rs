//! Engine counters
//!
//! Counters only: they increase monotonically and reset when the engine
//! is reopened. Relaxed ordering is enough since nothing synchronizes on
//! them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    log_bytes: AtomicU64,
    log_records: AtomicU64,
    log_flushes: AtomicU64,
    log_files_purged: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    page_reads: AtomicU64,
    page_writes: AtomicU64,
    page_evictions: AtomicU64,
    checkpoints: AtomicU64,
    checkpoint_failures: AtomicU64,
    redo_applied: AtomicU64,
    redo_skipped: AtomicU64,
    undo_applied: AtomicU64,
    trn_commits: AtomicU64,
    trn_rollbacks: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Log

    /// Add log bytes written
    pub fn add_log_bytes(&self, bytes: u64) {
        bump(&self.log_bytes, bytes);
    }

    /// Increment log records written
    pub fn increment_log_records(&self) {
        bump(&self.log_records, 1);
    }

    /// Increment log flushes
    pub fn increment_log_flushes(&self) {
        bump(&self.log_flushes, 1);
    }

    /// Add log files purged
    pub fn add_log_files_purged(&self, files: u64) {
        bump(&self.log_files_purged, files);
    }

    // Page cache

    /// Increment page cache hits
    pub fn increment_cache_hits(&self) {
        bump(&self.cache_hits, 1);
    }

    /// Increment page cache misses
    pub fn increment_cache_misses(&self) {
        bump(&self.cache_misses, 1);
    }

    /// Increment pages read from disk
    pub fn increment_page_reads(&self) {
        bump(&self.page_reads, 1);
    }

    /// Increment pages written to disk
    pub fn increment_page_writes(&self) {
        bump(&self.page_writes, 1);
    }

    /// Increment page evictions
    pub fn increment_page_evictions(&self) {
        bump(&self.page_evictions, 1);
    }

    // Checkpoint

    /// Increment checkpoints completed
    pub fn increment_checkpoints(&self) {
        bump(&self.checkpoints, 1);
    }

    /// Increment failed checkpoints
    pub fn increment_checkpoint_failures(&self) {
        bump(&self.checkpoint_failures, 1);
    }

    // Recovery

    /// Increment redo records applied
    pub fn increment_redo_applied(&self) {
        bump(&self.redo_applied, 1);
    }

    /// Increment redo records skipped
    pub fn increment_redo_skipped(&self) {
        bump(&self.redo_skipped, 1);
    }

    /// Increment undo records applied
    pub fn increment_undo_applied(&self) {
        bump(&self.undo_applied, 1);
    }

    // Transactions

    /// Increment committed transactions
    pub fn increment_trn_commits(&self) {
        bump(&self.trn_commits, 1);
    }

    /// Increment rolled back transactions
    pub fn increment_trn_rollbacks(&self) {
        bump(&self.trn_rollbacks, 1);
    }

    /// Take a point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            log_bytes: load(&self.log_bytes),
            log_records: load(&self.log_records),
            log_flushes: load(&self.log_flushes),
            log_files_purged: load(&self.log_files_purged),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            page_reads: load(&self.page_reads),
            page_writes: load(&self.page_writes),
            page_evictions: load(&self.page_evictions),
            checkpoints: load(&self.checkpoints),
            checkpoint_failures: load(&self.checkpoint_failures),
            redo_applied: load(&self.redo_applied),
            redo_skipped: load(&self.redo_skipped),
            undo_applied: load(&self.undo_applied),
            trn_commits: load(&self.trn_commits),
            trn_rollbacks: load(&self.trn_rollbacks),
        }
    }

    /// All counters as one JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub log_bytes: u64,
    pub log_records: u64,
    pub log_flushes: u64,
    pub log_files_purged: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub page_reads: u64,
    pub page_writes: u64,
    pub page_evictions: u64,
    pub checkpoints: u64,
    pub checkpoint_failures: u64,
    pub redo_applied: u64,
    pub redo_skipped: u64,
    pub undo_applied: u64,
    pub trn_commits: u64,
    pub trn_rollbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.log_bytes, 0);
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.redo_applied, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.add_log_bytes(100);
        registry.add_log_bytes(50);
        registry.increment_log_records();
        registry.increment_cache_misses();
        registry.increment_cache_misses();
        registry.add_log_files_purged(3);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.log_bytes, 150);
        assert_eq!(snapshot.log_records, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.log_files_purged, 3);
    }

    #[test]
    fn test_to_json_is_valid() {
        let registry = MetricsRegistry::new();
        registry.increment_checkpoints();
        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["checkpoints"], 1);
    }
}
