use crate::{CacheMetrics, CacheOperation, EvictionReason};
use std::time::Duration;
use tracing::{debug, warn};

/// Metrics adapter that logs events via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Service name/prefix (optional)
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create new tracing metrics adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name prefix
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &str) {
        debug!(
            target: "transcache",
            event = "hit",
            key = %key,
            service = ?self.service_name,
            "Cache Hit"
        );
    }

    fn record_miss(&self, key: &str) {
        debug!(
            target: "transcache",
            event = "miss",
            key = %key,
            service = ?self.service_name,
            "Cache Miss"
        );
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        tracing::trace!(
            target: "transcache",
            event = "latency",
            operation = operation.as_str(),
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "Cache Operation Latency"
        );
    }

    fn record_eviction(&self, reason: EvictionReason) {
        debug!(
            target: "transcache",
            event = "eviction",
            reason = reason.as_str(),
            service = ?self.service_name,
            "Cache Eviction"
        );
    }

    fn record_fallback(&self, key: Option<&str>) {
        warn!(
            target: "transcache",
            event = "fallback",
            key = ?key,
            service = ?self.service_name,
            "Conversion served without cache"
        );
    }

    fn record_size(&self, entries: usize, bytes: u64) {
        tracing::trace!(
            target: "transcache",
            event = "size",
            entries = entries,
            bytes = bytes,
            service = ?self.service_name,
            "Cache Size Update"
        );
    }
}
