//! Cache entry metadata record

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use super::options::ConversionOptions;

/// Metadata for one cached conversion result
///
/// Serialized as the on-disk metadata record. Field names on disk follow the
/// record layout (`output_file`, `file_size`), timestamps are Unix seconds.
/// Entries are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `{content_hash}_{output_format}_{options_hash}`
    pub cache_key: String,
    /// Name of the file the conversion started from
    pub original_filename: String,
    /// Store-owned copy of the converted file
    #[serde(rename = "output_file")]
    pub artifact_path: PathBuf,
    /// Target format
    pub output_format: String,
    /// When the entry was written
    #[serde(with = "unix_seconds")]
    pub created_at: SystemTime,
    /// `created_at + ttl`, with the ttl capped at [`CacheEntry::MAX_TTL`]
    #[serde(with = "unix_seconds")]
    pub expires_at: SystemTime,
    /// Artifact size in bytes
    #[serde(rename = "file_size")]
    pub size_bytes: u64,
    /// Options the conversion ran with
    pub conversion_options: ConversionOptions,
}

impl CacheEntry {
    /// Longest lifetime an entry can be given; larger TTLs are clamped
    pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

    /// Build an entry created now and expiring after `ttl`
    pub fn new(
        cache_key: impl Into<String>,
        original_filename: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
        output_format: impl Into<String>,
        size_bytes: u64,
        conversion_options: ConversionOptions,
        ttl: Duration,
    ) -> Self {
        let created_at = unix_seconds::truncate(SystemTime::now());
        Self {
            cache_key: cache_key.into(),
            original_filename: original_filename.into(),
            artifact_path: artifact_path.into(),
            output_format: output_format.into(),
            created_at,
            expires_at: created_at + ttl.min(Self::MAX_TTL),
            size_bytes,
            conversion_options,
        }
    }

    /// Expired iff `now >= expires_at`
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Check expiry against the wall clock
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Full validity predicate: unexpired and the artifact is on disk
    ///
    /// Touches the filesystem; call from a blocking context.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        !self.is_expired_at(now) && self.artifact_path.is_file()
    }

    /// Configured lifetime of the entry
    pub fn ttl(&self) -> Duration {
        self.expires_at
            .duration_since(self.created_at)
            .unwrap_or_default()
    }

    /// Get remaining TTL
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.duration_since(SystemTime::now()).ok()
    }

    /// Get age of the entry
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }
}

/// Serde adapter storing a `SystemTime` as fractional Unix seconds
///
/// Times are kept at microsecond resolution so that a value survives the
/// trip through `f64` unchanged.
pub mod unix_seconds {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const MICROS_PER_SEC: f64 = 1_000_000.0;

    /// Drop sub-microsecond precision
    pub fn truncate(t: SystemTime) -> SystemTime {
        let micros = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        UNIX_EPOCH + Duration::from_micros(micros as u64)
    }

    pub fn serialize<S: Serializer>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let micros = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        serializer.serialize_f64(micros as f64 / MICROS_PER_SEC)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!("invalid timestamp: {secs}")));
        }
        let micros = (secs * MICROS_PER_SEC).round() as u64;
        Ok(UNIX_EPOCH + Duration::from_micros(micros))
    }
}
