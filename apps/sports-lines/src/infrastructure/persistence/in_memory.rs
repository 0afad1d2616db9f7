//! In-memory line store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{LineStore, StoreError};
use crate::domain::sport::SportName;

/// In-memory implementation of `LineStore`.
///
/// Suitable for testing and development. Not for production use.
#[derive(Debug, Default)]
pub struct InMemoryLineStore {
    lines: RwLock<HashMap<SportName, Vec<f64>>>,
    unavailable: AtomicBool,
}

impl InMemoryLineStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value appended for a sport, oldest first.
    #[must_use]
    pub fn lines(&self, sport: SportName) -> Vec<f64> {
        self.lines.read().get(&sport).cloned().unwrap_or_default()
    }

    /// Append a value directly (for test setup).
    pub fn push(&self, sport: SportName, line: f64) {
        self.lines.write().entry(sport).or_default().push(line);
    }

    /// Make every operation fail with a connection error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "connection to in-memory store refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LineStore for InMemoryLineStore {
    async fn append_line(&self, sport: SportName, line: f64) -> Result<(), StoreError> {
        self.check_available()?;
        self.push(sport, line);
        Ok(())
    }

    async fn latest_line(&self, sport: SportName) -> Result<f64, StoreError> {
        self.check_available()?;
        self.lines
            .read()
            .get(&sport)
            .and_then(|values| values.last().copied())
            .ok_or(StoreError::NotFound(sport))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
