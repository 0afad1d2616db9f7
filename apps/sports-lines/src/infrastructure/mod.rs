//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// gRPC subscription streaming server.
pub mod grpc;

/// Health check HTTP endpoint.
pub mod health;

/// Lines provider clients.
pub mod line_feed;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Line storage adapters.
pub mod persistence;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
