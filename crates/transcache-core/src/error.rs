//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
///
/// Only [`CacheError::Conversion`] ever reaches the caller of a cached
/// conversion; every other variant is an internal fault that the caching
/// layer absorbs by converting without the cache.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Entry metadata exists but cannot be parsed
    #[error("corrupted cache entry {key}: {reason}")]
    CorruptedEntry { key: String, reason: String },

    /// Metadata present but the artifact file is gone
    #[error("artifact missing for cache entry: {0}")]
    MissingArtifact(String),

    /// Writing an entry failed; the partial entry was rolled back
    #[error("failed to store cache entry {key}: {reason}")]
    StoreFailure { key: String, reason: String },

    /// Copying a cached artifact to its destination failed
    #[error("failed to materialize cache entry {key}: {reason}")]
    CoordinatorFailure { key: String, reason: String },

    /// Filesystem operation failed
    #[error("io error: {0}")]
    Io(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Malformed cache key
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// The wrapped converter failed
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// The converter does not handle the requested format
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Whether the error originated in the wrapped converter rather than in
    /// the cache itself
    pub fn is_conversion(&self) -> bool {
        matches!(self, CacheError::Conversion(_) | CacheError::UnsupportedFormat(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::MissingArtifact("abc_png_1234abcd".to_string());
        assert_eq!(
            err.to_string(),
            "artifact missing for cache entry: abc_png_1234abcd"
        );

        let err = CacheError::StoreFailure {
            key: "k".to_string(),
            reason: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "failed to store cache entry k: disk full");
    }

    #[test]
    fn test_conversion_classification() {
        assert!(CacheError::Conversion("boom".into()).is_conversion());
        assert!(CacheError::UnsupportedFormat("xyz".into()).is_conversion());
        assert!(!CacheError::Io("denied".into()).is_conversion());
        assert!(
            !CacheError::CorruptedEntry {
                key: "k".into(),
                reason: "eof".into()
            }
            .is_conversion()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(ref msg) if msg.contains("nope")));
    }
}
