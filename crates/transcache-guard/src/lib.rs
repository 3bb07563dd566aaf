//! transcache-guard: Admission control at the request boundary
//!
//! - [`SlidingWindowRateLimiter`]: at most N events per identity per window
//! - [`LockoutGuard`]: time-decaying lockout after repeated failures
//! - [`SessionRegistry`]: short-lived session ids
//! - [`AdminGate`]: credential check behind a lockout
//!
//! All state is process-local and in-memory.

mod admin;
mod config;
mod error;
mod guards;
mod lockout;
mod rate_limit;
mod session;

pub use admin::AdminGate;
pub use config::{GuardConfig, LockoutConfig, RateLimitConfig};
pub use error::{GuardError, GuardResult};
pub use guards::RequestGuards;
pub use lockout::{LockoutGuard, LockoutStatus};
pub use rate_limit::{Admission, SlidingWindowRateLimiter};
pub use session::{SessionRegistry, SessionStatus};
