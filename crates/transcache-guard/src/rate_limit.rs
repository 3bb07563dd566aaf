//! Sliding-window rate limiting per identity

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::{GuardError, GuardResult};

/// Outcome of [`SlidingWindowRateLimiter::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    /// Retry once the oldest in-window event ages out
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Admission::Allowed => None,
            Admission::Rejected { retry_after } => Some(*retry_after),
        }
    }

    pub fn into_result(self) -> GuardResult<()> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Rejected { retry_after } => Err(GuardError::RateLimited { retry_after }),
        }
    }
}

/// At most `limit` events per identity in any trailing `window`
///
/// Each limiter is its own namespace; two limiters never share counts even
/// for the same identity.
pub struct SlidingWindowRateLimiter {
    name: String,
    limit: usize,
    window: Duration,
    events: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            limit: config.limit,
            window: config.window,
            events: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `identity` if it fits in the window
    pub fn admit(&self, identity: &str) -> Admission {
        let now = Instant::now();
        let mut events = self.events.entry(identity.to_string()).or_default();
        prune(&mut events, now, self.window);

        if events.len() < self.limit {
            events.push_back(now);
            return Admission::Allowed;
        }

        let retry_after = events
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.window);
        debug!(
            limiter = %self.name,
            identity,
            in_window = events.len(),
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limit exceeded"
        );
        Admission::Rejected { retry_after }
    }

    /// Give back the most recent reservation, e.g. when a long-lived
    /// connection ends
    ///
    /// The identity is forgotten once it has no events left.
    pub fn release(&self, identity: &str) {
        if let Some(mut events) = self.events.get_mut(identity) {
            events.pop_back();
        }
        self.events.remove_if(identity, |_, events| events.is_empty());
    }

    /// Events currently counted against `identity`
    pub fn in_window(&self, identity: &str) -> usize {
        let now = Instant::now();
        self.events.get(identity).map_or(0, |events| {
            events
                .iter()
                .filter(|t| now.duration_since(**t) < self.window)
                .count()
        })
    }

    /// Forget identities with nothing in the window; returns how many
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.events.len();
        self.events.retain(|_, events| {
            prune(events, now, self.window);
            !events.is_empty()
        });
        before.saturating_sub(self.events.len())
    }

    /// Tracked identities
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Drop events at least `window` old
fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while events
        .front()
        .is_some_and(|t| now.duration_since(*t) >= window)
    {
        events.pop_front();
    }
}
