//! transcache: Content-addressed caching in front of format converters
//!
//! # Features
//!
//! - **Deterministic keys** from content, target format and options
//! - **Self-healing disk store** with atomic entry writes
//! - **Expiry and size-cap sweeps**, at startup, on a timer and on demand
//! - **Per-key exclusion** so concurrent requests convert once
//! - **Transparent fallback**: cache faults never fail a conversion
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::{Path, PathBuf};
//! use transcache::prelude::*;
//!
//! struct Thumbnailer;
//!
//! #[async_trait::async_trait]
//! impl Converter for Thumbnailer {
//!     async fn convert(
//!         &self,
//!         input: &Path,
//!         output_format: &str,
//!         _options: &ConversionOptions,
//!     ) -> Result<PathBuf> {
//!         let output = self.output_location(input, output_format);
//!         std::fs::copy(input, &output)?;
//!         Ok(output)
//!     }
//!
//!     fn supported_formats(&self) -> SupportedFormats {
//!         SupportedFormats::new(["jpg"], ["png"])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let cache = ConversionCache::open(CacheConfig::from_env()).await?;
//!     let maintenance = cache.start_maintenance();
//!
//!     let converter = CachedConverter::new(cache.clone(), Thumbnailer);
//!     let options = ConversionOptions::new().with("quality", 95);
//!     let output = converter.convert(Path::new("x.jpg"), "png", &options).await?;
//!     println!("converted to {}", output.display());
//!
//!     maintenance.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod coordinator;
mod facade;
mod service;

// Re-export core
pub use transcache_core::*;

// Re-export storage
pub use transcache_storage::{BlockingPool, CacheStore, EvictionPolicy, StoreConfig};

pub use config::{CacheConfig, LockRegistryConfig};
pub use coordinator::{CacheAccessCoordinator, KeyGuard, LockRegistry, Materialized};
pub use facade::{CachedConverter, convert_with_cache};
pub use service::{CacheInfo, ConfigSnapshot, ConversionCache, MaintenanceHandle};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, CachedConverter, ConversionCache, ConversionOptions, Converter,
        Result, SupportedFormats, convert_with_cache,
    };
}

#[cfg(test)]
mod tests;
