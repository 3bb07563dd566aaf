//! Expiry and size-cap sweeps over the store

use std::cmp::Ordering;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use transcache_core::{CacheOperation, EvictionReason, Result, SweepStats};

use crate::CacheStore;
use crate::store::{EntryState, ScannedEntry};

/// Removes invalid and excess entries from a [`CacheStore`]
///
/// Sweeps do not lock individual entries. A lookup racing a sweep sees the
/// entry either before or after removal and self-heals to a miss.
#[derive(Clone)]
pub struct EvictionPolicy {
    store: CacheStore,
    max_size_bytes: u64,
}

impl EvictionPolicy {
    /// Policy capped at the store's configured size
    pub fn new(store: CacheStore) -> Self {
        let max_size_bytes = store.config().max_size_bytes;
        Self {
            store,
            max_size_bytes,
        }
    }

    /// Override the size cap used by [`sweep_all`](Self::sweep_all)
    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Remove every entry that fails the validity predicate
    ///
    /// Abandoned staging and metadata-less directories older than
    /// [`ORPHAN_GRACE`](crate::ORPHAN_GRACE) are counted as corrupted.
    pub async fn sweep_expired(&self) -> Result<SweepStats> {
        let start = Instant::now();
        let store = self.store.clone();
        let stats = self
            .store
            .pool()
            .run(move || sweep_expired_blocking(&store))
            .await?;
        self.finish("expired", &stats, start);
        Ok(stats)
    }

    /// Remove oldest-created entries until total size is at or under `cap_bytes`
    ///
    /// Does nothing when the store already fits.
    pub async fn sweep_by_size(&self, cap_bytes: u64) -> Result<SweepStats> {
        let start = Instant::now();
        let store = self.store.clone();
        let stats = self
            .store
            .pool()
            .run(move || sweep_by_size_blocking(&store, cap_bytes))
            .await?;
        self.finish("size", &stats, start);
        Ok(stats)
    }

    /// Expired sweep followed by a size sweep at the configured cap
    pub async fn sweep_all(&self) -> Result<SweepStats> {
        let mut stats = self.sweep_expired().await?;
        stats.merge(&self.sweep_by_size(self.max_size_bytes).await?);
        Ok(stats)
    }

    fn finish(&self, kind: &str, stats: &SweepStats, start: Instant) {
        let metrics = self.store.metrics();
        metrics.record_latency(CacheOperation::Sweep, start.elapsed());
        metrics.record_size(stats.remaining_entries, stats.remaining_bytes);

        if stats.removed() > 0 {
            info!(
                sweep = kind,
                removed = stats.removed(),
                bytes_freed = stats.bytes_freed,
                remaining = stats.remaining_entries,
                "cache sweep removed entries"
            );
        } else {
            debug!(sweep = kind, remaining = stats.remaining_entries, "cache sweep found nothing to remove");
        }
    }
}

fn sweep_expired_blocking(store: &CacheStore) -> Result<SweepStats> {
    let now = SystemTime::now();
    let mut stats = SweepStats::default();

    for entry in store.scan_blocking()? {
        let (reason, counter) = match &entry.state {
            EntryState::Valid(_) => {
                tally_remaining(&mut stats, &entry);
                continue;
            }
            EntryState::Expired(_) => (EvictionReason::Expired, &mut stats.expired),
            EntryState::MissingArtifact(_) => {
                (EvictionReason::MissingArtifact, &mut stats.missing_artifact)
            }
            EntryState::Corrupted(_) => (EvictionReason::Corrupted, &mut stats.corrupted),
            EntryState::Incomplete if entry.is_abandoned(now) => {
                (EvictionReason::Corrupted, &mut stats.corrupted)
            }
            EntryState::Incomplete => {
                tally_remaining(&mut stats, &entry);
                continue;
            }
        };

        if store.remove_scanned(&entry, reason) {
            *counter += 1;
            stats.bytes_freed += entry.bytes;
        } else {
            tally_remaining(&mut stats, &entry);
        }
    }
    Ok(stats)
}

fn sweep_by_size_blocking(store: &CacheStore, cap_bytes: u64) -> Result<SweepStats> {
    let now = SystemTime::now();
    let scanned = store.scan_blocking()?;
    let mut total: u64 = scanned.iter().map(|e| e.bytes).sum();
    let mut remaining = scanned.iter().filter(|e| !e.staging).count();
    let mut stats = SweepStats::default();

    if total > cap_bytes {
        // In-flight stores are never candidates
        let mut candidates: Vec<&ScannedEntry> = scanned
            .iter()
            .filter(|e| !matches!(e.state, EntryState::Incomplete) || e.is_abandoned(now))
            .collect();
        candidates.sort_by(|a, b| oldest_first(a, b));

        for entry in candidates {
            if total <= cap_bytes {
                break;
            }
            if store.remove_scanned(entry, EvictionReason::Capacity) {
                total = total.saturating_sub(entry.bytes);
                if !entry.staging {
                    remaining -= 1;
                }
                stats.evicted_for_size += 1;
                stats.bytes_freed += entry.bytes;
            }
        }
    }

    stats.remaining_bytes = total;
    stats.remaining_entries = remaining;
    Ok(stats)
}

/// Unreadable entries sort as if created at the epoch
fn oldest_first(a: &ScannedEntry, b: &ScannedEntry) -> Ordering {
    let created = |e: &ScannedEntry| e.state.created_at().unwrap_or(UNIX_EPOCH);
    created(a)
        .cmp(&created(b))
        .then_with(|| a.name.cmp(&b.name))
}

fn tally_remaining(stats: &mut SweepStats, entry: &ScannedEntry) {
    if !entry.staging {
        stats.remaining_entries += 1;
    }
    stats.remaining_bytes += entry.bytes;
}
