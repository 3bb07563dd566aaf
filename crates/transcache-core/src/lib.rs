//! transcache-core: Core types and traits for the transcache library
//!
//! This crate provides the cache entry record, deterministic cache key
//! generation, the error taxonomy and the `Converter` capability that the
//! caching layer wraps.

mod error;
mod key;
mod traits;
mod types;

pub use error::{CacheError, Result};
pub use key::{CacheKey, KeyGenerator, HASH_CHUNK_SIZE, OPTIONS_HASH_LEN};
pub use traits::*;
pub use types::*;
