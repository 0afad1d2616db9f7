//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `LineStore`: append-only per-sport line log
//! - `LineFeed`: upstream lines provider

use async_trait::async_trait;

use crate::domain::sport::SportName;

// =============================================================================
// Line Store
// =============================================================================

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The sport's log holds no values yet.
    #[error("no line stored for {0}")]
    NotFound(SportName),
    /// Could not reach the database.
    #[error("storage connection failed: {0}")]
    Connection(String),
    /// A statement failed.
    #[error("storage query failed: {0}")]
    Query(String),
}

/// Append-only per-sport line log shared by ingestion and the stream engine.
///
/// Implementations must be safe for concurrent use; writes to different
/// sports never conflict and reads only look at the newest entry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineStore: Send + Sync {
    /// Append one value to the sport's log.
    async fn append_line(&self, sport: SportName, line: f64) -> Result<(), StoreError>;

    /// Most recently appended value for the sport.
    async fn latest_line(&self, sport: SportName) -> Result<f64, StoreError>;

    /// Check that storage is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

// =============================================================================
// Line Feed
// =============================================================================

/// Lines provider failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The request never produced a response.
    #[error("lines provider request failed: {0}")]
    Transport(String),
    /// The provider answered with a non-200 status.
    #[error("lines provider returned status {0}")]
    Status(u16),
    /// The body was not a valid lines document.
    #[error("lines provider response could not be decoded: {0}")]
    Decode(String),
}

/// Upstream source of current line values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineFeed: Send + Sync {
    /// Fetch the current values for a sport as `(identifier, value)` pairs,
    /// in the order the provider returned them.
    async fn fetch_lines(&self, sport: SportName) -> Result<Vec<(String, f64)>, FeedError>;
}
