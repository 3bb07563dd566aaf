//! Disk-backed cache store

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};
use transcache_core::{
    CacheEntry, CacheError, CacheKey, CacheMetrics, CacheOperation, CacheStats,
    ConversionOptions, EvictionReason, Lookup, MissReason, NoopMetrics, Result,
};

use crate::{BlockingPool, StoreConfig};

/// Metadata record inside each entry directory
pub const METADATA_FILE: &str = "metadata.json";

const METADATA_TMP: &str = "metadata.json.tmp";
const STAGING_PREFIX: &str = ".staging-";

/// Entry directories without metadata younger than this are left alone; a
/// store may still be filling them.
pub const ORPHAN_GRACE: Duration = Duration::from_secs(5 * 60);

/// Running counters
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    store_failures: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.store_failures,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// What an entry directory holds
#[derive(Debug)]
pub(crate) enum EntryState {
    Valid(CacheEntry),
    Expired(CacheEntry),
    MissingArtifact(CacheEntry),
    Corrupted(String),
    /// No metadata (yet)
    Incomplete,
}

impl EntryState {
    pub(crate) fn created_at(&self) -> Option<SystemTime> {
        match self {
            EntryState::Valid(e) | EntryState::Expired(e) | EntryState::MissingArtifact(e) => {
                Some(e.created_at)
            }
            EntryState::Corrupted(_) | EntryState::Incomplete => None,
        }
    }
}

/// One directory found by a scan
#[derive(Debug)]
pub(crate) struct ScannedEntry {
    pub name: String,
    pub dir: PathBuf,
    pub state: EntryState,
    pub bytes: u64,
    pub modified: SystemTime,
    pub staging: bool,
}

impl ScannedEntry {
    /// Incomplete directory past the grace period
    pub(crate) fn is_abandoned(&self, now: SystemTime) -> bool {
        matches!(self.state, EntryState::Incomplete)
            && now
                .duration_since(self.modified)
                .is_ok_and(|age| age > ORPHAN_GRACE)
    }
}

struct StoreInner {
    config: StoreConfig,
    counters: Counters,
    metrics: Arc<dyn CacheMetrics>,
    staging_seq: AtomicU64,
}

/// On-disk table of cache entries keyed by cache key
///
/// Cloning creates a new handle to the SAME underlying store. The cache
/// directory is owned exclusively by the store.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
    pool: BlockingPool,
}

impl CacheStore {
    /// Open (creating if needed) a store at `config.cache_dir`
    pub async fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(NoopMetrics)).await
    }

    /// Open with a metrics sink
    pub async fn open_with_metrics(
        config: StoreConfig,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.cache_dir)
            .await
            .map_err(|e| {
                CacheError::Io(format!(
                    "failed to create cache dir {}: {e}",
                    config.cache_dir.display()
                ))
            })?;

        info!(cache_dir = %config.cache_dir.display(), "opened cache store");
        let pool = BlockingPool::new(config.io_workers);
        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                counters: Counters::default(),
                metrics,
                staging_seq: AtomicU64::new(0),
            }),
            pool,
        })
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Worker pool used for blocking file work
    pub fn pool(&self) -> &BlockingPool {
        &self.pool
    }

    /// Metrics sink
    pub fn metrics(&self) -> &Arc<dyn CacheMetrics> {
        &self.inner.metrics
    }

    /// Look up a key, counting the outcome as a hit or miss
    ///
    /// Corrupted, expired, or artifact-less entries are removed and reported
    /// as misses.
    pub async fn lookup(&self, key: &str) -> Result<Lookup> {
        self.fetch(key, true).await
    }

    /// Same as [`lookup`](Self::lookup) without touching hit/miss counters
    pub async fn revalidate(&self, key: &str) -> Result<Lookup> {
        self.fetch(key, false).await
    }

    async fn fetch(&self, key: &str, counted: bool) -> Result<Lookup> {
        let key = CacheKey::parse(key)?;
        let name = key.to_string();
        let start = Instant::now();

        let inner = self.inner.clone();
        let lookup = self.pool.run(move || inner.lookup_blocking(&key)).await?;
        self.inner
            .metrics
            .record_latency(CacheOperation::Lookup, start.elapsed());

        if counted {
            self.record_lookup(&name, lookup.is_hit());
        }
        Ok(lookup)
    }

    /// Count one request as a hit or a miss
    ///
    /// For callers that look up through [`revalidate`](Self::revalidate) and
    /// only know the outcome once the request has been served.
    pub fn record_lookup(&self, key: &str, hit: bool) {
        if hit {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.inner.metrics.record_hit(key);
        } else {
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.inner.metrics.record_miss(key);
        }
    }

    /// Copy `artifact_source` into a new entry for `key`
    ///
    /// Any existing entry for the key is replaced. On failure nothing is left
    /// behind and [`CacheError::StoreFailure`] is returned.
    pub async fn store(
        &self,
        key: &str,
        original_filename: &str,
        artifact_source: &Path,
        output_format: &str,
        options: &ConversionOptions,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let key = CacheKey::parse(key)?;
        let original_filename = original_filename.to_string();
        let source = artifact_source.to_path_buf();
        let output_format = output_format.to_string();
        let options = options.clone();
        let start = Instant::now();

        let inner = self.inner.clone();
        let result = self
            .pool
            .run(move || {
                inner.write_entry(&key, &original_filename, &source, &output_format, options, ttl)
            })
            .await;
        self.inner
            .metrics
            .record_latency(CacheOperation::Store, start.elapsed());

        match result {
            Ok(entry) => {
                self.inner.counters.stores.fetch_add(1, Ordering::Relaxed);
                debug!(key = %entry.cache_key, bytes = entry.size_bytes, "stored cache entry");
                Ok(entry)
            }
            Err(err) => {
                self.inner
                    .counters
                    .store_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record_eviction(EvictionReason::RolledBack);
                Err(err)
            }
        }
    }

    /// Delete an entry; `Ok(false)` if there was none
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let key = CacheKey::parse(key)?;
        let inner = self.inner.clone();
        let removed = self
            .pool
            .run(move || inner.remove_dir(&inner.entry_dir(&key)))
            .await?;
        if removed {
            self.inner.note_eviction(EvictionReason::Invalidated);
        }
        Ok(removed)
    }

    /// Remove every entry and reset counters; returns entries removed
    pub async fn clear(&self) -> Result<usize> {
        let inner = self.inner.clone();
        let removed = self.pool.run(move || inner.clear_blocking()).await?;
        self.inner.counters.reset();
        self.inner.metrics.record_size(0, 0);
        info!(removed, "cleared cache store");
        Ok(removed)
    }

    /// Counter snapshot without touching the disk
    pub fn counters(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stores: c.stores.load(Ordering::Relaxed),
            store_failures: c.store_failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    /// Counters plus entry count and bytes on disk
    pub async fn stats(&self) -> Result<CacheStats> {
        let inner = self.inner.clone();
        let scanned = self.pool.run(move || inner.scan_blocking()).await?;
        let mut stats = self.counters();
        stats.entries = scanned.iter().filter(|s| !s.staging).count();
        stats.total_bytes = scanned.iter().map(|s| s.bytes).sum();
        self.inner
            .metrics
            .record_size(stats.entries, stats.total_bytes);
        Ok(stats)
    }

    /// Blocking directory scan; run on the pool
    pub(crate) fn scan_blocking(&self) -> Result<Vec<ScannedEntry>> {
        self.inner.scan_blocking()
    }

    pub(crate) fn remove_scanned(&self, entry: &ScannedEntry, reason: EvictionReason) -> bool {
        match self.inner.remove_dir(&entry.dir) {
            Ok(true) => {
                self.inner.note_eviction(reason);
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(entry = %entry.name, error = %err, "failed to remove cache entry");
                false
            }
        }
    }
}

impl StoreInner {
    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.config.cache_dir.join(key.to_string())
    }

    fn note_eviction(&self, reason: EvictionReason) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_eviction(reason);
    }

    fn lookup_blocking(&self, key: &CacheKey) -> Result<Lookup> {
        let dir = self.entry_dir(key);
        let name = key.to_string();

        let (miss, reason) = match read_state(&dir, &name, SystemTime::now())? {
            EntryState::Valid(entry) => return Ok(Lookup::Hit(entry)),
            EntryState::Incomplete => return Ok(Lookup::Miss(MissReason::Absent)),
            EntryState::Corrupted(cause) => {
                warn!(key = %name, cause = %cause, "corrupted cache metadata, removing entry");
                (MissReason::Corrupted, EvictionReason::Corrupted)
            }
            EntryState::Expired(_) => {
                debug!(key = %name, "cache entry expired");
                (MissReason::Expired, EvictionReason::Expired)
            }
            EntryState::MissingArtifact(entry) => {
                warn!(
                    key = %name,
                    path = %entry.artifact_path.display(),
                    "cached artifact missing on disk, removing entry"
                );
                (MissReason::MissingArtifact, EvictionReason::MissingArtifact)
            }
        };

        match self.remove_dir(&dir) {
            Ok(true) => self.note_eviction(reason),
            Ok(false) => {}
            Err(err) => warn!(key = %name, error = %err, "failed to remove stale cache entry"),
        }
        Ok(Lookup::Miss(miss))
    }

    fn write_entry(
        &self,
        key: &CacheKey,
        original_filename: &str,
        source: &Path,
        output_format: &str,
        options: ConversionOptions,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let staging = self.config.cache_dir.join(format!(
            "{STAGING_PREFIX}{key}-{}-{seq}",
            std::process::id()
        ));
        let final_dir = self.entry_dir(key);

        let result = assemble_entry(
            &staging,
            &final_dir,
            key,
            original_filename,
            source,
            output_format,
            options,
            ttl,
        );

        result.map_err(|err| {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %cleanup, "failed to roll back staging dir");
                }
            }
            warn!(key = %key, error = %err, "cache store failed, rolled back");
            CacheError::StoreFailure {
                key: key.to_string(),
                reason: err.to_string(),
            }
        })
    }

    fn remove_dir(&self, dir: &Path) -> Result<bool> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(format!("{}: {e}", dir.display()))),
        }
    }

    fn scan_blocking(&self) -> Result<Vec<ScannedEntry>> {
        let mut scanned = Vec::new();
        let read_dir = match fs::read_dir(&self.config.cache_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(scanned),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();

        for item in read_dir {
            let item = item?;
            if !item.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = item.file_name().to_string_lossy().into_owned();
            let dir = item.path();
            let staging = name.starts_with(STAGING_PREFIX);

            // Never touch directories the store did not create
            if !staging && CacheKey::parse(&name).is_err() {
                debug!(dir = %dir.display(), "skipping foreign directory in cache root");
                continue;
            }

            let state = if staging {
                EntryState::Incomplete
            } else {
                match read_state(&dir, &name, now) {
                    Ok(state) => state,
                    Err(err) => {
                        warn!(entry = %name, error = %err, "unreadable cache entry, skipping");
                        continue;
                    }
                }
            };
            let modified = item
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(now);

            scanned.push(ScannedEntry {
                bytes: dir_size(&dir),
                name,
                dir,
                state,
                modified,
                staging,
            });
        }
        Ok(scanned)
    }

    fn clear_blocking(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.scan_blocking()? {
            if self.remove_dir(&entry.dir)? && !entry.staging {
                removed += 1;
                self.metrics.record_eviction(EvictionReason::Invalidated);
            }
        }
        Ok(removed)
    }
}

/// Classify one entry directory
///
/// The artifact path is re-rooted in `dir` so a moved cache root or an
/// edited record can never point a hit outside the entry.
fn read_state(dir: &Path, name: &str, now: SystemTime) -> Result<EntryState> {
    let bytes = match fs::read(dir.join(METADATA_FILE)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(EntryState::Incomplete),
        Err(e) => return Err(e.into()),
    };

    let mut entry: CacheEntry = match serde_json::from_slice(&bytes) {
        Ok(entry) => entry,
        Err(e) => return Ok(EntryState::Corrupted(e.to_string())),
    };
    if entry.cache_key != name {
        return Ok(EntryState::Corrupted(format!(
            "metadata belongs to {}",
            entry.cache_key
        )));
    }
    let Some(file_name) = entry.artifact_path.file_name().map(ToOwned::to_owned) else {
        return Ok(EntryState::Corrupted("artifact path has no file name".into()));
    };
    entry.artifact_path = dir.join(file_name);

    if entry.is_expired_at(now) {
        Ok(EntryState::Expired(entry))
    } else if !entry.artifact_path.is_file() {
        Ok(EntryState::MissingArtifact(entry))
    } else {
        Ok(EntryState::Valid(entry))
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble_entry(
    staging: &Path,
    final_dir: &Path,
    key: &CacheKey,
    original_filename: &str,
    source: &Path,
    output_format: &str,
    options: ConversionOptions,
    ttl: Duration,
) -> Result<CacheEntry> {
    fs::create_dir_all(staging)?;

    let artifact_name = format!("output.{}", key.output_format());
    let size = fs::copy(source, staging.join(&artifact_name))
        .map_err(|e| CacheError::Io(format!("copy from {}: {e}", source.display())))?;

    let entry = CacheEntry::new(
        key.to_string(),
        original_filename,
        final_dir.join(&artifact_name),
        output_format,
        size,
        options,
        ttl,
    );
    let json =
        serde_json::to_vec_pretty(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

    let tmp = staging.join(METADATA_TMP);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, staging.join(METADATA_FILE))?;

    match fs::remove_dir_all(final_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::rename(staging, final_dir)?;
    Ok(entry)
}

fn dir_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|item| item.ok())
                .filter_map(|item| item.metadata().ok())
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len())
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn new_store() -> (TempDir, CacheStore) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(StoreConfig::new(dir.path().join("cache")))
            .await
            .unwrap();
        (dir, store)
    }

    fn artifact(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn quality(q: i64) -> ConversionOptions {
        ConversionOptions::new().with("quality", q)
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let (dir, store) = new_store().await;
        let source = artifact(&dir, "converted.png", b"png bytes");

        store
            .store(
                "h_png_a1b2",
                "x.jpg",
                &source,
                "png",
                &quality(95),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let entry = match store.lookup("h_png_a1b2").await.unwrap() {
            Lookup::Hit(entry) => entry,
            other => panic!("Expected cache hit, got {other:?}"),
        };
        assert_eq!(entry.output_format, "png");
        assert_eq!(entry.original_filename, "x.jpg");
        assert_eq!(entry.conversion_options, quality(95));
        assert_eq!(entry.size_bytes, 9);
        assert_eq!(fs::read(&entry.artifact_path).unwrap(), b"png bytes");
        assert!(entry.artifact_path.starts_with(&store.config().cache_dir));

        let stats = store.counters();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.stores, 1);
    }

    #[tokio::test]
    async fn test_lookup_absent() {
        let (_dir, store) = new_store().await;
        let lookup = store.lookup("nope_png_0000").await.unwrap();
        assert_eq!(lookup.miss_reason(), Some(MissReason::Absent));
        assert_eq!(store.counters().misses, 1);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let (_dir, store) = new_store().await;
        let err = store.lookup("../../etc_passwd_1").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_zero_ttl_expires() {
        let (dir, store) = new_store().await;
        let source = artifact(&dir, "a.png", b"a");
        store
            .store("k_png_0001", "a.jpg", &source, "png", &quality(1), Duration::ZERO)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let lookup = store.lookup("k_png_0001").await.unwrap();
        assert_eq!(lookup.miss_reason(), Some(MissReason::Expired));
        assert!(!store.config().cache_dir.join("k_png_0001").exists());
        assert_eq!(store.counters().evictions, 1);
    }

    #[tokio::test]
    async fn test_corrupted_metadata_self_heals() {
        let (dir, store) = new_store().await;
        let source = artifact(&dir, "a.png", b"a");
        store
            .store("k_png_0002", "a.jpg", &source, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap();

        let entry_dir = store.config().cache_dir.join("k_png_0002");
        fs::write(entry_dir.join(METADATA_FILE), b"{ not json").unwrap();

        let lookup = store.lookup("k_png_0002").await.unwrap();
        assert_eq!(lookup.miss_reason(), Some(MissReason::Corrupted));
        assert!(!entry_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_self_heals() {
        let (dir, store) = new_store().await;
        let source = artifact(&dir, "a.png", b"a");
        let entry = store
            .store("k_png_0003", "a.jpg", &source, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap();

        fs::remove_file(&entry.artifact_path).unwrap();

        let lookup = store.lookup("k_png_0003").await.unwrap();
        assert_eq!(lookup.miss_reason(), Some(MissReason::MissingArtifact));
        assert!(!store.config().cache_dir.join("k_png_0003").exists());
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back() {
        let (dir, store) = new_store().await;
        let missing = dir.path().join("does-not-exist.png");

        let err = store
            .store("k_png_0004", "a.jpg", &missing, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::StoreFailure { .. }));

        let leftovers: Vec<_> = fs::read_dir(&store.config().cache_dir).unwrap().collect();
        assert!(leftovers.is_empty());
        assert_eq!(store.counters().store_failures, 1);
    }

    #[tokio::test]
    async fn test_store_replaces_existing() {
        let (dir, store) = new_store().await;
        let first = artifact(&dir, "first.png", b"first");
        let second = artifact(&dir, "second.png", b"second!");

        store
            .store("k_png_0005", "a.jpg", &first, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .store("k_png_0005", "a.jpg", &second, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap();

        let entry = store.lookup("k_png_0005").await.unwrap().entry().unwrap();
        assert_eq!(fs::read(&entry.artifact_path).unwrap(), b"second!");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (dir, store) = new_store().await;
        let source = artifact(&dir, "a.png", b"a");
        store
            .store("k_png_0006", "a.jpg", &source, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.remove("k_png_0006").await.unwrap());
        assert!(!store.remove("k_png_0006").await.unwrap());
        assert!(!store.remove("never_png_0000").await.unwrap());
    }

    #[tokio::test]
    async fn test_revalidate_does_not_count() {
        let (_dir, store) = new_store().await;
        store.revalidate("k_png_0007").await.unwrap();
        let stats = store.counters();
        assert_eq!(stats.total_requests(), 0);

        store.record_lookup("k_png_0007", true);
        store.record_lookup("k_png_0007", false);
        let stats = store.counters();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let (dir, store) = new_store().await;
        let source = artifact(&dir, "a.png", b"abc");
        for key in ["a_png_0001", "b_png_0001", "c_png_0001"] {
            store
                .store(key, "a.jpg", &source, "png", &quality(1), Duration::from_secs(60))
                .await
                .unwrap();
        }
        store.lookup("a_png_0001").await.unwrap();
        assert_eq!(store.stats().await.unwrap().entries, 3);

        let removed = store.clear().await.unwrap();
        assert_eq!(removed, 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.stores, 0);
    }

    #[tokio::test]
    async fn test_foreign_directories_untouched() {
        let (dir, store) = new_store().await;
        let foreign = store.config().cache_dir.join("not a key");
        fs::create_dir_all(&foreign).unwrap();
        let source = artifact(&dir, "a.png", b"a");
        store
            .store("k_png_0008", "a.jpg", &source, "png", &quality(1), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(foreign.exists());
    }
}
