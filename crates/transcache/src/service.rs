//! Cache service object and administrative surface

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use transcache_core::{CacheEntry, CacheMetrics, NoopMetrics, Result, SweepStats};
use transcache_storage::{CacheStore, EvictionPolicy};

use crate::config::CacheConfig;
use crate::coordinator::{CacheAccessCoordinator, LockRegistry};

struct CacheInner {
    config: CacheConfig,
    enabled: AtomicBool,
    store: CacheStore,
    eviction: EvictionPolicy,
    coordinator: CacheAccessCoordinator,
}

/// Process-wide conversion cache
///
/// Construct once with [`open`](Self::open) and hand clones to whatever
/// needs it; all clones share one store, lock registry and set of counters.
#[derive(Clone)]
pub struct ConversionCache {
    inner: Arc<CacheInner>,
}

/// Snapshot of the config, as reported by [`ConversionCache::info`]
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub enabled: bool,
    pub cache_dir: PathBuf,
    pub expiration_secs: u64,
    pub max_size_bytes: u64,
    pub io_workers: usize,
    pub cleanup_interval_secs: u64,
}

/// Administrative view of the cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub stores: u64,
    pub store_failures: u64,
    pub evictions: u64,
    pub lock_slots: usize,
    pub config: ConfigSnapshot,
}

impl ConversionCache {
    /// Open the store and run the startup sweep
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(NoopMetrics)).await
    }

    /// Open with a metrics sink
    pub async fn open_with_metrics(
        config: CacheConfig,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Result<Self> {
        let store = CacheStore::open_with_metrics(config.store.clone(), metrics.clone()).await?;
        let eviction = EvictionPolicy::new(store.clone());
        let registry = Arc::new(LockRegistry::new(&config.lock_registry));
        let coordinator = CacheAccessCoordinator::new(registry, store.pool().clone(), metrics);

        let cache = Self {
            inner: Arc::new(CacheInner {
                enabled: AtomicBool::new(config.enabled),
                config,
                store,
                eviction,
                coordinator,
            }),
        };

        // A failed startup sweep leaves stale entries for the next one
        match cache.cleanup().await {
            Ok(stats) => info!(
                cache_dir = %cache.inner.config.store.cache_dir.display(),
                enabled = cache.is_enabled(),
                removed = stats.removed(),
                entries = stats.remaining_entries,
                "conversion cache ready"
            ),
            Err(err) => warn!(error = %err, "startup cache sweep failed"),
        }
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &CacheAccessCoordinator {
        &self.inner.coordinator
    }

    pub fn eviction(&self) -> &EvictionPolicy {
        &self.inner.eviction
    }

    pub fn metrics(&self) -> &Arc<dyn CacheMetrics> {
        self.inner.store.metrics()
    }

    /// Whether conversions go through the cache
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Toggle caching at runtime
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "conversion cache toggled");
    }

    /// Entry count, bytes, hit rate and config
    pub async fn info(&self) -> Result<CacheInfo> {
        let stats = self.inner.store.stats().await?;
        let config = &self.inner.config;

        Ok(CacheInfo {
            entries: stats.entries,
            total_bytes: stats.total_bytes,
            hits: stats.hits,
            misses: stats.misses,
            total_requests: stats.total_requests(),
            hit_rate: stats.hit_ratio(),
            stores: stats.stores,
            store_failures: stats.store_failures,
            evictions: stats.evictions,
            lock_slots: self.inner.coordinator.registry().len(),
            config: ConfigSnapshot {
                enabled: self.is_enabled(),
                cache_dir: config.store.cache_dir.clone(),
                expiration_secs: config.store.default_ttl.as_secs(),
                max_size_bytes: self.inner.eviction.max_size_bytes(),
                io_workers: config.store.io_workers,
                cleanup_interval_secs: config.cleanup_interval.as_secs(),
            },
        })
    }

    /// Run a full sweep now
    pub async fn cleanup(&self) -> Result<SweepStats> {
        self.inner.eviction.sweep_all().await
    }

    /// Remove every entry and reset counters
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.inner.store.clear().await?;
        let slots = self.inner.coordinator.registry().collect_idle();
        debug!(removed, slots, "cleared conversion cache");
        Ok(removed)
    }

    /// Spawn the periodic sweep
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let eviction = self.inner.eviction.clone();
        // interval() rejects a zero period
        let period = self
            .inner
            .config
            .cleanup_interval
            .clamp(Duration::from_millis(1), CacheEntry::MAX_TTL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; open() already swept
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = eviction.sweep_all().await {
                            warn!(error = %err, "periodic cache sweep failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("cache maintenance stopped");
        });

        info!(interval_secs = period.as_secs(), "cache maintenance started");
        MaintenanceHandle { shutdown, task }
    }
}

/// Running maintenance task
///
/// Dropping the handle without [`shutdown`](Self::shutdown) also stops the
/// task at its next wake-up.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for an in-progress sweep to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "cache maintenance task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
