//! Failure-counting lockout with time decay

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::LockoutConfig;
use crate::error::{GuardError, GuardResult};

#[derive(Debug, Default)]
struct LockoutState {
    failures: VecDeque<Instant>,
    /// Set exactly when `failures.len() >= max_failures`
    locked_since: Option<Instant>,
}

/// Lock state of one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LockoutStatus {
    Open,
    Locked { remaining: Duration },
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutStatus::Locked { .. })
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            LockoutStatus::Open => None,
            LockoutStatus::Locked { remaining } => Some(*remaining),
        }
    }

    pub fn into_result(self) -> GuardResult<()> {
        match self {
            LockoutStatus::Open => Ok(()),
            LockoutStatus::Locked { remaining } => Err(GuardError::LockedOut { remaining }),
        }
    }
}

/// Locks an identity out for `duration` after `max_failures` failures
/// within `duration`
///
/// Expiry is evaluated lazily on the next check; an expired lock takes the
/// failure history with it.
pub struct LockoutGuard {
    max_failures: usize,
    duration: Duration,
    states: DashMap<String, LockoutState>,
}

impl LockoutGuard {
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            max_failures: config.max_failures.max(1),
            duration: config.duration,
            states: DashMap::new(),
        }
    }

    pub fn max_failures(&self) -> usize {
        self.max_failures
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Count a failure; returns the resulting status
    pub fn record_failure(&self, identity: &str) -> LockoutStatus {
        let now = Instant::now();
        let mut state = self.states.entry(identity.to_string()).or_default();

        match state.locked_since {
            Some(since) if now.duration_since(since) >= self.duration => {
                *state = LockoutState::default();
            }
            // Failures while locked are recorded but never extend the lock
            Some(_) => {}
            None => {
                while state
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.duration)
                {
                    state.failures.pop_front();
                }
            }
        }

        state.failures.push_back(now);
        if state.locked_since.is_none() && state.failures.len() >= self.max_failures {
            state.locked_since = Some(now);
            warn!(
                identity,
                failures = state.failures.len(),
                lockout_secs = self.duration.as_secs(),
                "identity locked out"
            );
        }

        self.status_of(&state, now)
    }

    /// Whether `identity` is locked right now
    pub fn is_locked_out(&self, identity: &str) -> LockoutStatus {
        let now = Instant::now();
        let expired = self
            .states
            .remove_if(identity, |_, state| {
                state
                    .locked_since
                    .is_some_and(|since| now.duration_since(since) >= self.duration)
            })
            .is_some();
        if expired {
            info!(identity, "lockout expired");
            return LockoutStatus::Open;
        }

        self.states
            .get(identity)
            .map_or(LockoutStatus::Open, |state| self.status_of(&state, now))
    }

    /// Forget all failures and any lock, e.g. after a successful login
    pub fn clear(&self, identity: &str) {
        self.states.remove(identity);
    }

    /// Failures still inside the window
    pub fn failure_count(&self, identity: &str) -> usize {
        let now = Instant::now();
        self.states.get(identity).map_or(0, |state| match state.locked_since {
            Some(since) if now.duration_since(since) >= self.duration => 0,
            Some(_) => state.failures.len(),
            None => state
                .failures
                .iter()
                .filter(|t| now.duration_since(**t) < self.duration)
                .count(),
        })
    }

    /// Drop identities whose lock and failures have all aged out
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.states.len();
        self.states.retain(|_, state| match state.locked_since {
            Some(since) => now.duration_since(since) < self.duration,
            None => state
                .failures
                .back()
                .is_some_and(|t| now.duration_since(*t) < self.duration),
        });
        before.saturating_sub(self.states.len())
    }

    fn status_of(&self, state: &LockoutState, now: Instant) -> LockoutStatus {
        match state.locked_since {
            Some(since) => {
                let elapsed = now.duration_since(since);
                if elapsed >= self.duration {
                    LockoutStatus::Open
                } else {
                    LockoutStatus::Locked {
                        remaining: self.duration - elapsed,
                    }
                }
            }
            None => LockoutStatus::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> LockoutGuard {
        LockoutGuard::new(LockoutConfig {
            max_failures: 5,
            duration: Duration::from_secs(15 * 60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifth_failure_locks() {
        let guard = guard();
        for _ in 0..4 {
            assert_eq!(guard.record_failure("admin-ip"), LockoutStatus::Open);
        }
        assert!(!guard.is_locked_out("admin-ip").is_locked());

        let status = guard.record_failure("admin-ip");
        assert!(status.is_locked());

        let status = guard.is_locked_out("admin-ip");
        assert!(status.remaining().unwrap() > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires_with_fresh_count() {
        let guard = guard();
        for _ in 0..5 {
            guard.record_failure("x");
        }
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(
            guard.is_locked_out("x").remaining(),
            Some(Duration::from_secs(10 * 60))
        );

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(guard.is_locked_out("x"), LockoutStatus::Open);
        assert_eq!(guard.failure_count("x"), 0);

        assert_eq!(guard.record_failure("x"), LockoutStatus::Open);
        assert_eq!(guard.failure_count("x"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_failures_decay() {
        let guard = guard();
        for _ in 0..4 {
            guard.record_failure("x");
        }
        tokio::time::advance(Duration::from_secs(16 * 60)).await;

        assert_eq!(guard.failure_count("x"), 0);
        assert_eq!(guard.record_failure("x"), LockoutStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_while_locked_do_not_extend() {
        let guard = guard();
        for _ in 0..5 {
            guard.record_failure("x");
        }
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        guard.record_failure("x");

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert!(!guard.is_locked_out("x").is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears() {
        let guard = guard();
        for _ in 0..5 {
            guard.record_failure("x");
        }
        guard.clear("x");

        assert_eq!(guard.is_locked_out("x"), LockoutStatus::Open);
        assert_eq!(guard.failure_count("x"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_idle() {
        let guard = guard();
        guard.record_failure("stale");
        for _ in 0..5 {
            guard.record_failure("locked");
        }
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        guard.record_failure("recent");
        tokio::time::advance(Duration::from_secs(6 * 60)).await;

        // "stale" and the expired "locked" go, "recent" stays
        assert_eq!(guard.purge_idle(), 2);
        assert_eq!(guard.failure_count("recent"), 1);
    }

    #[test]
    fn test_status_into_result() {
        let err = LockoutStatus::Locked {
            remaining: Duration::from_secs(3),
        }
        .into_result()
        .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }
}
