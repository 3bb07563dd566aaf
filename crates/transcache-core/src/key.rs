//! Deterministic cache keys for conversion results
//!
//! A key is `{content_hash}_{output_format}_{options_hash}`: a blake3 digest
//! of the raw input bytes, the lowercased target format, and the first
//! [`OPTIONS_HASH_LEN`] hex characters of a blake3 digest over the canonical
//! options encoding.

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use crate::{CacheError, ConversionOptions, Result};

/// Bytes read per hashing step
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hex characters kept from the options digest
pub const OPTIONS_HASH_LEN: usize = 8;

/// A parsed, validated cache key
///
/// Every component is restricted to characters that are safe in a single
/// path segment, since the store names entry directories after the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    content_hash: String,
    output_format: String,
    options_hash: String,
}

impl CacheKey {
    /// Assemble a key from its components
    pub fn new(
        content_hash: impl Into<String>,
        output_format: impl Into<String>,
        options_hash: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            content_hash: content_hash.into(),
            output_format: output_format.into(),
            options_hash: options_hash.into(),
        };
        key.validate()?;
        Ok(key)
    }

    /// Parse `{content_hash}_{output_format}_{options_hash}`
    ///
    /// The hashes never contain `_`, so the format is everything between the
    /// first and the last separator.
    pub fn parse(raw: &str) -> Result<Self> {
        let (content_hash, rest) = raw
            .split_once('_')
            .ok_or_else(|| CacheError::InvalidKey(raw.to_string()))?;
        let (output_format, options_hash) = rest
            .rsplit_once('_')
            .ok_or_else(|| CacheError::InvalidKey(raw.to_string()))?;
        Self::new(content_hash, output_format, options_hash)
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    pub fn options_hash(&self) -> &str {
        &self.options_hash
    }

    fn validate(&self) -> Result<()> {
        let hash_ok = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric());
        let format_ok = !self.output_format.is_empty()
            && self.output_format != "."
            && self.output_format != ".."
            && self
                .output_format
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'+'));

        if hash_ok(&self.content_hash) && format_ok && hash_ok(&self.options_hash) {
            Ok(())
        } else {
            Err(CacheError::InvalidKey(self.to_string()))
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.content_hash, self.output_format, self.options_hash
        )
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Derives cache keys from content, format and options
///
/// All methods read synchronously; callers on an async runtime should run
/// them on a blocking worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Key for a content stream
    pub fn key<R: Read>(
        &self,
        content: R,
        output_format: &str,
        options: &ConversionOptions,
    ) -> Result<CacheKey> {
        let content_hash = self.content_hash(content)?;
        let options_hash = self.options_hash(options)?;
        CacheKey::new(content_hash, output_format.to_ascii_lowercase(), options_hash)
    }

    /// Key for a file on disk
    pub fn key_for_path(
        &self,
        path: &Path,
        output_format: &str,
        options: &ConversionOptions,
    ) -> Result<CacheKey> {
        let file = File::open(path)
            .map_err(|e| CacheError::Io(format!("{}: {e}", path.display())))?;
        self.key(file, output_format, options)
    }

    /// Streaming blake3 over fixed-size chunks; memory use is constant
    pub fn content_hash<R: Read>(&self, mut content: R) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            match content.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Truncated digest of the canonical options encoding
    pub fn options_hash(&self, options: &ConversionOptions) -> Result<String> {
        let canonical = options.canonical_json()?;
        let digest = blake3::hash(canonical.as_bytes()).to_hex();
        Ok(digest[..OPTIONS_HASH_LEN].to_string())
    }
}
