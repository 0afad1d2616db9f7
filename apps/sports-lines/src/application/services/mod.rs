//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ingestion`: initial sync and per-sport polling into storage
//! - `readiness`: set-once flag consulted by the readiness probe
//! - `retry`: bounded retry policy shared by startup steps

pub mod ingestion;
pub mod readiness;
pub mod retry;

pub use ingestion::{
    IngestError, IngestFailure, InitialSync, InitialSyncError, SportPoller, ingest_sport,
};
pub use readiness::ReadinessState;
pub use retry::{RetryConfig, RetryPolicy};
