//! Guard configuration

use std::str::FromStr;
use std::time::Duration;

/// Limit and trailing window for one rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Events admitted per window
    pub limit: usize,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }

    /// `limit` events per minute
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Failure threshold and lock length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutConfig {
    pub max_failures: usize,
    pub duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            duration: Duration::from_secs(15 * 60),
        }
    }
}

/// Configuration for [`RequestGuards`](crate::RequestGuards)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Progress-subscription connection attempts
    pub progress: RateLimitConfig,
    /// Conversion submissions
    pub conversions: RateLimitConfig,
    /// Administrative credential failures
    pub lockout: LockoutConfig,
    /// Session lifetime
    pub session_ttl: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            progress: RateLimitConfig::per_minute(30),
            conversions: RateLimitConfig::per_minute(10),
            lockout: LockoutConfig::default(),
            session_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl GuardConfig {
    /// Load from `TRANSCACHE_*` environment variables
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            parsed::<u64>(lookup(name))
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            progress: RateLimitConfig {
                limit: parsed(lookup("TRANSCACHE_PROGRESS_RATE_LIMIT"))
                    .unwrap_or(defaults.progress.limit),
                window: secs(
                    "TRANSCACHE_PROGRESS_RATE_WINDOW_SECS",
                    defaults.progress.window,
                ),
            },
            conversions: RateLimitConfig {
                limit: parsed(lookup("TRANSCACHE_CONVERSION_RATE_LIMIT"))
                    .unwrap_or(defaults.conversions.limit),
                window: secs(
                    "TRANSCACHE_CONVERSION_RATE_WINDOW_SECS",
                    defaults.conversions.window,
                ),
            },
            lockout: LockoutConfig {
                max_failures: parsed(lookup("TRANSCACHE_LOCKOUT_MAX_FAILURES"))
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.lockout.max_failures),
                duration: secs("TRANSCACHE_LOCKOUT_DURATION_SECS", defaults.lockout.duration),
            },
            session_ttl: secs("TRANSCACHE_SESSION_TTL_SECS", defaults.session_ttl),
        }
    }
}

fn parsed<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
}
