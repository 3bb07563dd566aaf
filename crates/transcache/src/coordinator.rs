//! Per-key exclusion for cache materialization

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as SlotMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, trace};
use transcache_core::{CacheEntry, CacheError, CacheMetrics, CacheOperation, Result};
use transcache_storage::BlockingPool;

use crate::config::LockRegistryConfig;

struct LockSlot {
    lock: Arc<SlotMutex<()>>,
    last_used: Instant,
}

/// Registry of per-key mutexes with idle collection
///
/// A slot is removed only while the registry guard is held and only when no
/// one else holds a reference to its mutex. Since references are handed out
/// exclusively under that same guard, an acquirer can never see its slot
/// disappear between lookup and lock.
pub struct LockRegistry {
    slots: Mutex<HashMap<String, LockSlot>>,
    max_slots: usize,
    max_idle: Duration,
}

/// Exclusive hold on one key; released on drop
pub struct KeyGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl LockRegistry {
    pub fn new(config: &LockRegistryConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_slots: config.max_slots,
            max_idle: config.max_idle,
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = self.slot(key);
        KeyGuard {
            key: key.to_string(),
            _guard: slot.lock_owned().await,
        }
    }

    fn slot(&self, key: &str) -> Arc<SlotMutex<()>> {
        let now = Instant::now();
        let mut slots = self.slots.lock();

        let lock = match slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_used = now;
                occupied.get().lock.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(LockSlot {
                    lock: Arc::new(SlotMutex::new(())),
                    last_used: now,
                })
                .lock
                .clone(),
        };

        if slots.len() > self.max_slots {
            let removed = collect(&mut slots, now, self.max_idle);
            if removed > 0 {
                debug!(removed, remaining = slots.len(), "collected idle key locks");
            }
        }
        lock
    }

    /// Drop every idle, unreferenced slot past `max_idle`, regardless of size
    pub fn collect_idle(&self) -> usize {
        let mut slots = self.slots.lock();
        collect(&mut slots, Instant::now(), self.max_idle)
    }

    /// Whether someone currently holds `key`
    pub fn is_held(&self, key: &str) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.lock.try_lock().is_err())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caller must hold the registry guard
fn collect(slots: &mut HashMap<String, LockSlot>, now: Instant, max_idle: Duration) -> usize {
    let before = slots.len();
    slots.retain(|_, slot| {
        Arc::strong_count(&slot.lock) > 1 || now.duration_since(slot.last_used) <= max_idle
    });
    before - slots.len()
}

/// Outcome of copying a cached artifact out of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// Copied to this path
    Copied(PathBuf),
    /// Evicted since the lookup; reconvert
    Vanished,
}

/// Serializes materialization of cache hits per key
#[derive(Clone)]
pub struct CacheAccessCoordinator {
    registry: Arc<LockRegistry>,
    pool: BlockingPool,
    metrics: Arc<dyn CacheMetrics>,
    seq: Arc<AtomicU64>,
}

impl CacheAccessCoordinator {
    pub fn new(
        registry: Arc<LockRegistry>,
        pool: BlockingPool,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        Self {
            registry,
            pool,
            metrics,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Exclusive hold on `key`
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.registry.lock(key).await
    }

    /// Lock the entry's key and copy its artifact to `dest`
    pub async fn materialize(&self, entry: &CacheEntry, dest: &Path) -> Result<Materialized> {
        let guard = self.lock(&entry.cache_key).await;
        self.materialize_locked(entry, dest, &guard).await
    }

    /// Copy under a hold the caller already has
    ///
    /// The artifact is re-checked first; if a sweep removed it since the
    /// lookup the result is [`Materialized::Vanished`]. The copy lands in a
    /// temporary sibling and is renamed over `dest`, so readers of `dest`
    /// never see a partial file.
    pub async fn materialize_locked(
        &self,
        entry: &CacheEntry,
        dest: &Path,
        guard: &KeyGuard,
    ) -> Result<Materialized> {
        debug_assert_eq!(guard.key(), entry.cache_key);

        let start = std::time::Instant::now();
        let source = entry.artifact_path.clone();
        let dest = dest.to_path_buf();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = entry.cache_key.clone();

        let outcome = self
            .pool
            .run(move || copy_artifact(&source, &dest, seq))
            .await
            .map_err(|err| CacheError::CoordinatorFailure {
                key: key.clone(),
                reason: err.to_string(),
            })?;

        self.metrics
            .record_latency(CacheOperation::Materialize, start.elapsed());
        trace!(key = %key, outcome = ?outcome, "materialized cache entry");
        Ok(outcome)
    }
}

fn copy_artifact(source: &Path, dest: &Path, seq: u64) -> Result<Materialized> {
    if !source.is_file() {
        return Ok(Materialized::Vanished);
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CacheError::Io(format!("{} has no file name", dest.display())))?;
    let partial = dest.with_file_name(format!(".{file_name}.{}.{seq}.part", std::process::id()));

    let copied = fs::copy(source, &partial).and_then(|_| fs::rename(&partial, dest));
    match copied {
        Ok(()) => Ok(Materialized::Copied(dest.to_path_buf())),
        // Evicted between the check and the copy
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !source.exists() => {
            let _ = fs::remove_file(&partial);
            Ok(Materialized::Vanished)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e.into())
        }
    }
}
