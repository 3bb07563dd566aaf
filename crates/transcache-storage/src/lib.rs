//! transcache-storage: On-disk store and eviction for transcache
//!
//! Each cache entry is a directory under the cache root named after its key,
//! holding the converted artifact and a JSON metadata record. Entries are
//! assembled in a hidden staging directory and renamed into place, so a
//! reader sees either a complete entry or none at all.

mod config;
mod eviction;
mod pool;
mod store;

pub use config::StoreConfig;
pub use eviction::EvictionPolicy;
pub use pool::BlockingPool;
pub use store::{CacheStore, METADATA_FILE, ORPHAN_GRACE};
