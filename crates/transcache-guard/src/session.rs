//! Short-lived session tracking

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{GuardError, GuardResult};

/// Result of a session check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Valid,
    /// Never registered, or removed
    Unknown,
    /// Registered but older than the TTL; pruned by this check
    Expired,
}

impl SessionStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionStatus::Valid)
    }

    /// Why the session is invalid
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            SessionStatus::Valid => None,
            SessionStatus::Unknown => Some("unknown session"),
            SessionStatus::Expired => Some("session expired"),
        }
    }

    pub fn into_result(self) -> GuardResult<()> {
        match self.reason() {
            None => Ok(()),
            Some(reason) => Err(GuardError::InvalidSession {
                reason: reason.to_string(),
            }),
        }
    }
}

/// Session ids valid for `ttl` after registration
pub struct SessionRegistry {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Instant>>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start (or restart) the session `id`
    pub fn register(&self, id: impl Into<String>) {
        self.sessions.lock().insert(id.into(), Instant::now());
    }

    /// Register a fresh random id and return it
    pub fn issue(&self) -> String {
        let bytes: [u8; 16] = rand::rng().random();
        let id: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        self.register(id.clone());
        id
    }

    /// Check `id`, pruning every expired session first
    pub fn is_valid(&self, id: &str) -> SessionStatus {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let mut requested_expired = false;
        let before = sessions.len();

        sessions.retain(|sid, created| {
            let live = now.duration_since(*created) <= self.ttl;
            if !live && sid == id {
                requested_expired = true;
            }
            live
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "pruned expired sessions");
        }

        if sessions.contains_key(id) {
            SessionStatus::Valid
        } else if requested_expired {
            SessionStatus::Expired
        } else {
            SessionStatus::Unknown
        }
    }

    /// End a session; false if it was not registered
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    /// Drop expired sessions without checking any id
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, created| now.duration_since(*created) <= self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
