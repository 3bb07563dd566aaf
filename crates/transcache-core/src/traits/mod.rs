//! Core traits for cache operations

mod converter;
mod metrics;
#[cfg(feature = "tracing")]
mod tracing;

pub use converter::{Converter, SupportedFormats};
pub use metrics::{CacheMetrics, CacheOperation, EvictionReason, NoopMetrics};

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;

#[cfg(feature = "tracing")]
pub use self::tracing::TracingMetrics;
