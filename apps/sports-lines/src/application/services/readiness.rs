//! Readiness State
//!
//! Records that the initial sync has completed. Written once by startup,
//! read by the readiness probe.

use std::sync::atomic::{AtomicBool, Ordering};

/// Set-once flag marking storage as synced with the lines provider.
#[derive(Debug, Default)]
pub struct ReadinessState {
    synced: AtomicBool,
}

impl ReadinessState {
    /// Create an unsynced state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            synced: AtomicBool::new(false),
        }
    }

    /// Mark the initial sync as complete. Later calls have no effect.
    pub fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::AcqRel) {
            tracing::info!("Service marked ready");
        }
    }

    /// Whether the initial sync has completed.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unsynced_and_stays_synced() {
        let state = ReadinessState::new();
        assert!(!state.is_synced());

        state.mark_synced();
        state.mark_synced();
        assert!(state.is_synced());
    }
}
