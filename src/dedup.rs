//! Processed-transaction deduplication
//!
//! A tx hash that has produced an alert is never alerted on again, even when
//! the scanner rescans its block. The check and the mark happen in one step so
//! two callers racing on the same hash cannot both win.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::db::Database;

pub trait ProcessedStore: Send + Sync {
    /// Mark `tx_hash` processed. Returns true if it was not processed before.
    fn check_and_mark(&self, tx_hash: &str) -> Result<bool>;

    fn is_processed(&self, tx_hash: &str) -> Result<bool>;
}

impl ProcessedStore for Database {
    fn check_and_mark(&self, tx_hash: &str) -> Result<bool> {
        self.mark_processed_if_new(tx_hash)
    }

    fn is_processed(&self, tx_hash: &str) -> Result<bool> {
        Database::is_processed(self, tx_hash)
    }
}

/// Statistics for monitoring deduplication effectiveness
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeduplicationStats {
    pub total_checked: u64,
    pub duplicates_dropped: u64,
    pub unique_hashes: u64,
}

impl DeduplicationStats {
    /// Duplicate rate as percentage
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checked == 0 {
            0.0
        } else {
            (self.duplicates_dropped as f64 / self.total_checked as f64) * 100.0
        }
    }
}

/// Running totals of `check_and_mark` outcomes
#[derive(Debug, Default)]
pub struct DedupCounters {
    total_checked: AtomicU64,
    duplicates_dropped: AtomicU64,
}

impl DedupCounters {
    pub fn record(&self, is_new: bool) {
        self.total_checked.fetch_add(1, Ordering::Relaxed);
        if !is_new {
            self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> DeduplicationStats {
        let total_checked = self.total_checked.load(Ordering::Relaxed);
        let duplicates_dropped = self.duplicates_dropped.load(Ordering::Relaxed);
        DeduplicationStats {
            total_checked,
            duplicates_dropped,
            unique_hashes: total_checked.saturating_sub(duplicates_dropped),
        }
    }
}

/// Process-local store for scanner tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryProcessedStore {
    seen: dashmap::DashMap<String, ()>,
}

#[cfg(test)]
impl MemoryProcessedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
impl ProcessedStore for MemoryProcessedStore {
    fn check_and_mark(&self, tx_hash: &str) -> Result<bool> {
        // insert returns the previous value under the shard lock
        Ok(self.seen.insert(tx_hash.to_lowercase(), ()).is_none())
    }

    fn is_processed(&self, tx_hash: &str) -> Result<bool> {
        Ok(self.seen.contains_key(&tx_hash.to_lowercase()))
    }
}
