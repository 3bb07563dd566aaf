//! Bounded pool for blocking file work

use std::sync::Arc;
use tokio::sync::Semaphore;

use transcache_core::{CacheError, Result};

/// Runs blocking closures on tokio's blocking threads, at most `workers` at
/// a time
///
/// Hashing, copying and directory scans go through here so they never run
/// on the async scheduler. A job keeps running to completion even if the
/// awaiting future is dropped.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl BlockingPool {
    /// Create a pool; zero is treated as one
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Run `job` once a worker slot is free
    pub async fn run<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CacheError::Internal("blocking pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| CacheError::Internal(format!("blocking task failed: {e}")))?
    }

    /// Configured worker bound
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Slots not currently in use
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
