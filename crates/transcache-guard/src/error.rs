//! Admission errors

use std::time::Duration;
use thiserror::Error;

/// Rejections surfaced to the caller
///
/// These are deliberate admission-control signals, not faults; the rate and
/// lockout variants carry a retry hint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Too many requests in the trailing window
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Too many failed credential checks
    #[error("locked out for another {remaining:?}")]
    LockedOut { remaining: Duration },

    /// The credential check failed
    #[error("invalid credential")]
    InvalidCredential,

    /// Unknown or expired session id
    #[error("invalid session: {reason}")]
    InvalidSession { reason: String },
}

impl GuardError {
    /// How long the caller should wait before retrying, if known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimited { retry_after } => Some(*retry_after),
            GuardError::LockedOut { remaining } => Some(*remaining),
            GuardError::InvalidCredential | GuardError::InvalidSession { .. } => None,
        }
    }

    /// Retry hint rounded up to whole seconds, for `Retry-After` style headers
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 { secs + 1 } else { secs }
        })
    }
}

/// Result type alias for guard checks
pub type GuardResult<T> = std::result::Result<T, GuardError>;
