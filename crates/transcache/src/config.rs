//! Cache service configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use transcache_core::CacheEntry;
use transcache_storage::StoreConfig;

/// Bounds for the per-key lock registry
#[derive(Debug, Clone)]
pub struct LockRegistryConfig {
    /// Registry size above which idle slots are collected
    pub max_slots: usize,
    /// Minimum idle time before a slot may be collected
    pub max_idle: Duration,
}

impl Default for LockRegistryConfig {
    fn default() -> Self {
        Self {
            max_slots: 1024,
            max_idle: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration for [`ConversionCache`](crate::ConversionCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global switch; when off every conversion goes straight to the converter
    pub enabled: bool,
    /// On-disk store settings
    pub store: StoreConfig,
    /// Period of the background sweep
    pub cleanup_interval: Duration,
    /// Lock registry bounds
    pub lock_registry: LockRegistryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreConfig::default(),
            cleanup_interval: Duration::from_secs(60 * 60),
            lock_registry: LockRegistryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Config rooted at `cache_dir` with defaults elsewhere
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(cache_dir),
            ..Default::default()
        }
    }

    /// Turn caching off
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Entry lifetime
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.store.default_ttl = ttl;
        self
    }

    /// Size cap enforced by sweeps
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.store.max_size_bytes = bytes;
        self
    }

    /// Background sweep period
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Load from `TRANSCACHE_*` environment variables
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mut store = defaults.store;
        if let Some(dir) = lookup("TRANSCACHE_CACHE_DIR").filter(|d| !d.trim().is_empty()) {
            store.cache_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parsed::<u64>(lookup("TRANSCACHE_EXPIRATION_SECS")) {
            store.default_ttl = Duration::from_secs(secs).min(CacheEntry::MAX_TTL);
        }
        if let Some(bytes) = parsed::<u64>(lookup("TRANSCACHE_MAX_SIZE_BYTES")) {
            store.max_size_bytes = bytes;
        }
        if let Some(workers) = parsed::<usize>(lookup("TRANSCACHE_IO_WORKERS")) {
            store.io_workers = workers.max(1);
        }

        Self {
            enabled: lookup("TRANSCACHE_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.enabled),
            store,
            cleanup_interval: parsed::<u64>(lookup("TRANSCACHE_CLEANUP_INTERVAL_SECS"))
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs).min(CacheEntry::MAX_TTL))
                .unwrap_or(defaults.cleanup_interval),
            lock_registry: defaults.lock_registry,
        }
    }
}

fn parsed<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.store.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.store.default_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.lock_registry.max_slots, 1024);
    }

    #[test]
    fn test_from_lookup() {
        let config = CacheConfig::from_lookup(lookup(&[
            ("TRANSCACHE_ENABLED", "no"),
            ("TRANSCACHE_CACHE_DIR", "/var/cache/conv"),
            ("TRANSCACHE_EXPIRATION_SECS", "120"),
            ("TRANSCACHE_MAX_SIZE_BYTES", "4096"),
            ("TRANSCACHE_IO_WORKERS", "0"),
            ("TRANSCACHE_CLEANUP_INTERVAL_SECS", "30"),
        ]));

        assert!(!config.enabled);
        assert_eq!(config.store.cache_dir, PathBuf::from("/var/cache/conv"));
        assert_eq!(config.store.default_ttl, Duration::from_secs(120));
        assert_eq!(config.store.max_size_bytes, 4096);
        assert_eq!(config.store.io_workers, 1);
        assert_eq!(config.cleanup_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_garbage_keeps_defaults() {
        let config = CacheConfig::from_lookup(lookup(&[
            ("TRANSCACHE_ENABLED", "maybe"),
            ("TRANSCACHE_EXPIRATION_SECS", "soon"),
            ("TRANSCACHE_CLEANUP_INTERVAL_SECS", "0"),
        ]));
        let defaults = CacheConfig::default();

        assert!(config.enabled);
        assert_eq!(config.store.default_ttl, defaults.store.default_ttl);
        assert_eq!(config.cleanup_interval, defaults.cleanup_interval);
    }

    #[test]
    fn test_huge_durations_are_clamped() {
        let max = u64::MAX.to_string();
        let config = CacheConfig::from_lookup(lookup(&[
            ("TRANSCACHE_EXPIRATION_SECS", &max),
            ("TRANSCACHE_CLEANUP_INTERVAL_SECS", &max),
        ]));

        assert_eq!(config.store.default_ttl, CacheEntry::MAX_TTL);
        assert_eq!(config.cleanup_interval, CacheEntry::MAX_TTL);
    }
}
