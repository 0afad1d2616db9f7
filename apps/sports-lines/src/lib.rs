#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Sports Lines - Betting Line Ingestion and Subscription Streaming
//!
//! Polls an upstream lines provider per sport into an append-only store and
//! serves long-lived bidirectional gRPC streams on which clients subscribe to
//! a set of sports and receive a snapshot followed by periodic deltas.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: sport names, subscription validation, transition and delta
//!   rules
//!
//! - **Application**: port definitions and services
//!   - `ports`: `LineStore` and `LineFeed`
//!   - `services`: initial sync, pollers, readiness, retry policy
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `persistence`: PostgreSQL and in-memory line stores
//!   - `line_feed`: HTTP lines provider client
//!   - `grpc`: subscription stream engine
//!   - `config`: environment configuration
//!   - `health`: liveness, readiness and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//! Lines provider ──► pollers ──► LineStore ──► stream sessions ──► Client 1
//!                                                    │         ──► Client 2
//!                                                    └──────── ──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Sport names and subscription rules.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::sport::SportName;
pub use domain::subscription::{Subscription, SubscriptionError, Transition, compute_delta};

// Ports and services
pub use application::ports::{FeedError, LineFeed, LineStore, StoreError};
pub use application::services::{
    InitialSync, InitialSyncError, ReadinessState, RetryConfig, SportPoller,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// Adapters
pub use infrastructure::line_feed::{HttpLineFeed, ScriptedLineFeed};
pub use infrastructure::persistence::{ConnectError, InMemoryLineStore, PostgresLineStore};

// Health server
pub use infrastructure::health::{
    HealthMonitor, HealthServer, HealthServerError, HealthServerState,
};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{SportsLinesServer, proto::sportslines::v1 as proto};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
