//! Subscription Types
//!
//! Validation of client subscription requests and the pure decisions the
//! stream engine makes on every accepted request.
//!
//! # Design
//!
//! A stream carries a sequence of requests. Each accepted request is turned
//! into a [`Subscription`] and compared against the previous one:
//! - an unchanged sport set restarts deltas against the existing baseline
//! - any other change (including the first request) sends a fresh snapshot
//!
//! Deltas are always `baseline - latest`, relative to the value captured when
//! the snapshot was taken, never to the previous tick.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::domain::sport::SportName;

// =============================================================================
// Types
// =============================================================================

/// Maximum number of sport names a single request may carry.
pub const MAX_SPORTS_PER_SUBSCRIPTION: usize = 3;

/// Line value captured per sport when a subscription episode starts.
pub type Baseline = BTreeMap<SportName, f64>;

/// Reasons a subscription request is rejected.
///
/// Checked in declaration order; the first failure wins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Interval missing or zero.
    #[error("interval was not provided or is zero")]
    InvalidInterval,
    /// No sport names supplied.
    #[error("sport names were not provided")]
    MissingSportNames,
    /// More names than [`MAX_SPORTS_PER_SUBSCRIPTION`].
    #[error("{0} sport names provided, at most 3 are allowed")]
    TooManySports(usize),
    /// A name outside the supported set.
    #[error("unknown sport name {name:?}, a sport name must be one of the following: {accepted}")]
    UnknownSportName {
        /// The rejected name.
        name: String,
        /// Accepted names, comma separated.
        accepted: String,
    },
}

/// A validated subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Time between emissions.
    pub interval: Duration,
    /// Subscribed sports; duplicates in the raw request collapse.
    pub sports: BTreeSet<SportName>,
}

impl Subscription {
    /// Validate a raw request.
    ///
    /// # Errors
    ///
    /// Returns the first [`SubscriptionError`] that applies.
    pub fn validate(interval_secs: u32, sport_names: &[String]) -> Result<Self, SubscriptionError> {
        if interval_secs == 0 {
            return Err(SubscriptionError::InvalidInterval);
        }

        if sport_names.is_empty() {
            return Err(SubscriptionError::MissingSportNames);
        }

        if sport_names.len() > MAX_SPORTS_PER_SUBSCRIPTION {
            return Err(SubscriptionError::TooManySports(sport_names.len()));
        }

        let sports = sport_names
            .iter()
            .map(|name| {
                name.parse::<SportName>()
                    .map_err(|_| SubscriptionError::UnknownSportName {
                        name: name.clone(),
                        accepted: SportName::accepted_names(),
                    })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            interval: Duration::from_secs(u64::from(interval_secs)),
            sports,
        })
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// What the engine does with a newly accepted subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Fetch and send absolute values, then start deltas from them.
    Snapshot,
    /// Restart deltas against the baseline already held for these sports.
    DeltasOnly,
}

impl Transition {
    /// Decide the transition from the previously accepted sport set.
    ///
    /// `prev` is empty before the first request on a stream.
    #[must_use]
    pub fn between(prev: &BTreeSet<SportName>, next: &BTreeSet<SportName>) -> Self {
        if next.len() == prev.len() && next.is_subset(prev) {
            Self::DeltasOnly
        } else {
            Self::Snapshot
        }
    }
}

/// Movement of a line since the baseline was captured.
#[must_use]
pub fn compute_delta(baseline: f64, latest: f64) -> f64 {
    baseline - latest
}

// =============================================================================
// Tests
// =============================================================================
