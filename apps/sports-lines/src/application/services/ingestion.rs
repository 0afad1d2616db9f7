//! Line Ingestion
//!
//! Moves values from the lines provider into storage.
//!
//! - [`InitialSync`] runs once before serving: every configured sport must be
//!   fetched and stored in the same round, and the whole round is retried on
//!   any failure until the attempt budget is spent.
//! - [`SportPoller`] runs per sport after the initial sync and keeps storage
//!   current. A failure ends that sport's poller only.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::retry::{RetryConfig, RetryPolicy};
use crate::application::ports::{FeedError, LineFeed, LineStore, StoreError};
use crate::domain::sport::SportName;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// What went wrong while ingesting one sport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestFailure {
    /// Fetching from the provider failed.
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// Appending to storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An ingestion failure for a specific sport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{sport}: {source}")]
pub struct IngestError {
    /// Sport being ingested.
    pub sport: SportName,
    /// Underlying failure.
    #[source]
    pub source: IngestFailure,
}

/// Initial sync failures.
#[derive(Debug, thiserror::Error)]
pub enum InitialSyncError {
    /// Every round failed; carries each error from every round.
    #[error("failed to sync storage with the lines provider after {attempts} attempt(s)")]
    Exhausted {
        /// Rounds attempted.
        attempts: u32,
        /// Errors accumulated across all rounds.
        errors: Vec<IngestError>,
    },
    /// Shutdown was requested before the sync finished.
    #[error("initial sync cancelled")]
    Cancelled,
}

/// Fetch the current values for one sport and append each, in received order.
///
/// Returns the number of values stored.
///
/// # Errors
///
/// Returns the first feed or storage failure.
pub async fn ingest_sport(
    feed: &dyn LineFeed,
    store: &dyn LineStore,
    sport: SportName,
) -> Result<usize, IngestError> {
    let wrap = |source: IngestFailure| IngestError { sport, source };

    let lines = feed
        .fetch_lines(sport)
        .await
        .map_err(|e| wrap(e.into()))?;

    for (_, line) in &lines {
        store
            .append_line(sport, *line)
            .await
            .map_err(|e| wrap(e.into()))?;
    }

    metrics::record_lines_ingested(sport, lines.len() as u64);
    Ok(lines.len())
}

// =============================================================================
// Initial Sync
// =============================================================================

/// One-shot bulk sync performed before the service accepts subscribers.
pub struct InitialSync {
    feed: Arc<dyn LineFeed>,
    store: Arc<dyn LineStore>,
    sports: Vec<SportName>,
    retry: RetryConfig,
}

impl InitialSync {
    /// Create a sync over the given sports.
    #[must_use]
    pub fn new(
        feed: Arc<dyn LineFeed>,
        store: Arc<dyn LineStore>,
        sports: Vec<SportName>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            feed,
            store,
            sports,
            retry,
        }
    }

    /// Run rounds until one succeeds for every sport.
    ///
    /// Values written by failed rounds are kept.
    ///
    /// Returns the number of rounds it took.
    ///
    /// # Errors
    ///
    /// [`InitialSyncError::Exhausted`] when every round failed,
    /// [`InitialSyncError::Cancelled`] on shutdown.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<u32, InitialSyncError> {
        let mut policy = RetryPolicy::new(self.retry.clone());
        let mut accumulated = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            metrics::record_sync_attempt();

            let errors = tokio::select! {
                () = cancel.cancelled() => return Err(InitialSyncError::Cancelled),
                errors = self.round() => errors,
            };

            if errors.is_empty() {
                tracing::info!(attempt, "Storage synced with the lines provider");
                return Ok(attempt);
            }

            for error in &errors {
                tracing::warn!(attempt, error = %error, "Initial sync failed for sport");
            }
            accumulated.extend(errors);

            let Some(delay) = policy.next_delay() else {
                return Err(InitialSyncError::Exhausted {
                    attempts: attempt,
                    errors: accumulated,
                });
            };

            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts(),
                delay_secs = delay.as_secs_f64(),
                "Cannot sync storage with the lines provider, retrying"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(InitialSyncError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn round(&self) -> Vec<IngestError> {
        let fetches = self
            .sports
            .iter()
            .map(|&sport| ingest_sport(self.feed.as_ref(), self.store.as_ref(), sport));

        join_all(fetches)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Keeps one sport's log current by polling the provider.
pub struct SportPoller {
    sport: SportName,
    interval: Duration,
    feed: Arc<dyn LineFeed>,
    store: Arc<dyn LineStore>,
}

impl SportPoller {
    /// Create a poller for one sport.
    #[must_use]
    pub fn new(
        sport: SportName,
        interval: Duration,
        feed: Arc<dyn LineFeed>,
        store: Arc<dyn LineStore>,
    ) -> Self {
        Self {
            sport,
            interval,
            feed,
            store,
        }
    }

    /// Poll until cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first ingestion failure; the poller does not restart.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), IngestError> {
        tracing::info!(
            sport = %self.sport,
            interval_secs = self.interval.as_secs(),
            "Poller started"
        );

        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = ingest_sport(self.feed.as_ref(), self.store.as_ref(), self.sport) => result,
            };

            match result {
                Ok(count) => {
                    tracing::debug!(sport = %self.sport, count, "Lines ingested");
                }
                Err(e) => {
                    metrics::record_ingest_error(self.sport);
                    tracing::error!(sport = %self.sport, error = %e, "Poller stopped");
                    return Err(e);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(sport = %self.sport, "Poller stopped on shutdown");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
