//! Core types for cache operations

mod entry;
mod options;
mod result;
mod stats;

pub use entry::{CacheEntry, unix_seconds};
pub use options::{ConversionOptions, OptionValue};
pub use result::{Lookup, MissReason};
pub use stats::{CacheStats, SweepStats};
