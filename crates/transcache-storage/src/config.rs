//! Configuration for the disk store

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the disk store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory owned by the store
    pub cache_dir: PathBuf,
    /// Lifetime of new entries
    pub default_ttl: Duration,
    /// Size cap enforced by size sweeps
    pub max_size_bytes: u64,
    /// Concurrent blocking file operations
    pub io_workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            default_ttl: Duration::from_secs(24 * 60 * 60),
            max_size_bytes: 1024 * 1024 * 1024, // 1 GiB
            io_workers: 4,
        }
    }
}

impl StoreConfig {
    /// Create config rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Set entry lifetime
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set entry lifetime in seconds
    pub fn ttl_secs(self, seconds: u64) -> Self {
        self.ttl(Duration::from_secs(seconds))
    }

    /// Set the size cap
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Set the blocking worker bound
    pub fn io_workers(mut self, workers: usize) -> Self {
        self.io_workers = workers.max(1);
        self
    }
}
