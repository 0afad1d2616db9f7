//! Domain Layer - Core line streaming types and business logic.
//!
//! This layer contains the sport enumeration, subscription validation, and
//! the pure transition and delta rules. It depends on nothing outside the
//! standard library and `thiserror`.

/// The closed set of supported sports.
pub mod sport;

/// Subscription validation, transitions, and delta computation.
pub mod subscription;
