//! Shared session liveness flag
//!
//! Watchdog expiry, FEC scheme mismatch and latency saturation all pull
//! the same cord. Death is sticky: once a session is marked dead it
//! stays dead until the pipeline reaps it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to one session's liveness state.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    /// Create a live flag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the session is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the session dead. Logs once; repeated kills are no-ops.
    pub fn kill(&self, reason: &str) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::warn!(reason, "session marked dead");
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
