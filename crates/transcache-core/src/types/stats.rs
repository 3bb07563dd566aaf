//! Cache statistics

use serde::Serialize;

/// Statistics for cache operations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of entries written
    pub stores: u64,
    /// Number of writes rolled back
    pub store_failures: u64,
    /// Number of entries removed by lookups, sweeps or clears
    pub evictions: u64,
    /// Current number of entries
    pub entries: usize,
    /// Bytes held by the store
    pub total_bytes: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate miss ratio (0.0 to 1.0)
    pub fn miss_ratio(&self) -> f64 {
        1.0 - self.hit_ratio()
    }

    /// Total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Outcome of an eviction sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Removed because `now >= expires_at`
    pub expired: usize,
    /// Removed because metadata was unreadable
    pub corrupted: usize,
    /// Removed because the artifact was gone
    pub missing_artifact: usize,
    /// Removed to bring the store under its size cap
    pub evicted_for_size: usize,
    /// Bytes reclaimed
    pub bytes_freed: u64,
    /// Entries left after the sweep
    pub remaining_entries: usize,
    /// Bytes left after the sweep
    pub remaining_bytes: u64,
}

impl SweepStats {
    /// Total entries removed
    pub fn removed(&self) -> usize {
        self.expired + self.corrupted + self.missing_artifact + self.evicted_for_size
    }

    /// Fold a later sweep into this one
    pub fn merge(&mut self, other: &SweepStats) {
        self.expired += other.expired;
        self.corrupted += other.corrupted;
        self.missing_artifact += other.missing_artifact;
        self.evicted_for_size += other.evicted_for_size;
        self.bytes_freed += other.bytes_freed;
        self.remaining_entries = other.remaining_entries; // Use latest size
        self.remaining_bytes = other.remaining_bytes;
    }
}
