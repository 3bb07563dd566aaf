//! Request-boundary guard bundle

use tracing::debug;

use crate::admin::AdminGate;
use crate::config::GuardConfig;
use crate::rate_limit::SlidingWindowRateLimiter;
use crate::session::SessionRegistry;

/// Every guard consulted at the request boundary, built from one config
///
/// Construct once and share by reference; state is in-memory and lost on
/// restart.
pub struct RequestGuards {
    progress: SlidingWindowRateLimiter,
    conversions: SlidingWindowRateLimiter,
    admin: AdminGate,
    sessions: SessionRegistry,
}

impl RequestGuards {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            progress: SlidingWindowRateLimiter::new("progress", config.progress),
            conversions: SlidingWindowRateLimiter::new("conversions", config.conversions),
            admin: AdminGate::new(config.lockout),
            sessions: SessionRegistry::new(config.session_ttl),
        }
    }

    /// Progress-subscription connection attempts
    pub fn progress(&self) -> &SlidingWindowRateLimiter {
        &self.progress
    }

    /// Conversion submissions
    pub fn conversions(&self) -> &SlidingWindowRateLimiter {
        &self.conversions
    }

    pub fn admin(&self) -> &AdminGate {
        &self.admin
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Drop idle per-identity state in every guard
    pub fn purge_idle(&self) -> usize {
        let removed = self.progress.purge_idle()
            + self.conversions.purge_idle()
            + self.admin.lockout().purge_idle()
            + self.sessions.purge_expired();
        if removed > 0 {
            debug!(removed, "purged idle guard state");
        }
        removed
    }
}

impl Default for RequestGuards {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}
