//! Cache lookup result type

use super::entry::CacheEntry;

/// Why a lookup did not produce a usable entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissReason {
    /// No metadata for the key
    Absent,
    /// Metadata could not be parsed; entry removed
    Corrupted,
    /// `now >= expires_at`; entry removed
    Expired,
    /// Artifact file gone; entry removed
    MissingArtifact,
}

impl MissReason {
    /// Get reason as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::Corrupted => "corrupted",
            MissReason::Expired => "expired",
            MissReason::MissingArtifact => "missing_artifact",
        }
    }

    /// Whether the lookup removed a broken entry on the way
    pub fn healed(&self) -> bool {
        !matches!(self, MissReason::Absent)
    }
}

/// Result of a cache lookup operation
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Valid entry
    Hit(CacheEntry),
    /// No usable entry
    Miss(MissReason),
}

impl Lookup {
    /// Check if this is a hit
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Check if this is a miss
    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss(_))
    }

    /// Extract the entry, consuming the result
    pub fn entry(self) -> Option<CacheEntry> {
        match self {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss(_) => None,
        }
    }

    /// Miss reason, if any
    pub fn miss_reason(&self) -> Option<MissReason> {
        match self {
            Lookup::Hit(_) => None,
            Lookup::Miss(reason) => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConversionOptions;
    use std::time::Duration;

    #[test]
    fn test_hit() {
        let entry = CacheEntry::new(
            "k_png_00000000",
            "a.jpg",
            "/tmp/a.png",
            "png",
            1,
            ConversionOptions::new(),
            Duration::from_secs(1),
        );
        let result = Lookup::Hit(entry);

        assert!(result.is_hit());
        assert!(!result.is_miss());
        assert!(result.miss_reason().is_none());
        assert_eq!(result.entry().unwrap().output_format, "png");
    }

    #[test]
    fn test_miss() {
        let result = Lookup::Miss(MissReason::Expired);

        assert!(result.is_miss());
        assert_eq!(result.miss_reason(), Some(MissReason::Expired));
        assert!(result.entry().is_none());
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(MissReason::Absent.as_str(), "absent");
        assert_eq!(MissReason::MissingArtifact.as_str(), "missing_artifact");
        assert!(!MissReason::Absent.healed());
        assert!(MissReason::Corrupted.healed());
    }
}
