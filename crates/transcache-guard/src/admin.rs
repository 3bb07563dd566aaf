//! Credential check with failure lockout for administrative operations

use tracing::warn;

use crate::config::LockoutConfig;
use crate::error::{GuardError, GuardResult};
use crate::lockout::LockoutGuard;

/// Wraps a caller-supplied credential check in a [`LockoutGuard`]
pub struct AdminGate {
    lockout: LockoutGuard,
}

impl AdminGate {
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            lockout: LockoutGuard::new(config),
        }
    }

    pub fn lockout(&self) -> &LockoutGuard {
        &self.lockout
    }

    /// Admit `identity` if it is not locked out and `check` passes
    ///
    /// `check` is not called while the identity is locked out. A pass clears
    /// the failure history; a fail counts toward the lockout.
    pub fn authorize(&self, identity: &str, check: impl FnOnce() -> bool) -> GuardResult<()> {
        self.lockout.is_locked_out(identity).into_result()?;

        if check() {
            self.lockout.clear(identity);
            return Ok(());
        }

        let status = self.lockout.record_failure(identity);
        warn!(
            identity,
            failures = self.lockout.failure_count(identity),
            locked = status.is_locked(),
            "admin credential rejected"
        );
        Err(GuardError::InvalidCredential)
    }
}
