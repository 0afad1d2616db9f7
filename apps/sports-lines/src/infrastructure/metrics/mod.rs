//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Ingestion**: lines stored, poller failures, initial sync rounds
//! - **Streams**: open subscription streams, responses sent by kind, stream
//!   terminations by reason
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::sport::SportName;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const LINES_INGESTED: &str = "sports_lines_lines_ingested_total";
const INGEST_ERRORS: &str = "sports_lines_ingest_errors_total";
const SYNC_ATTEMPTS: &str = "sports_lines_sync_attempts_total";
const RESPONSES_SENT: &str = "sports_lines_responses_sent_total";
const ACTIVE_STREAMS: &str = "sports_lines_active_streams";
const STREAM_ERRORS: &str = "sports_lines_stream_errors_total";

fn register_metrics() {
    describe_counter!(LINES_INGESTED, "Line values appended to storage");
    describe_counter!(INGEST_ERRORS, "Poller failures that stopped a sport's poller");
    describe_counter!(SYNC_ATTEMPTS, "Initial sync rounds started");
    describe_counter!(RESPONSES_SENT, "Responses sent to subscribers");
    describe_gauge!(ACTIVE_STREAMS, "Open subscription streams");
    describe_counter!(STREAM_ERRORS, "Subscription streams ended with an error");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Kind of response sent on a subscription stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Absolute values.
    Snapshot,
    /// Differences from the baseline.
    Delta,
}

impl ResponseKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Delta => "delta",
        }
    }
}

/// Record values appended for a sport.
pub fn record_lines_ingested(sport: SportName, count: u64) {
    counter!(LINES_INGESTED, "sport" => sport.as_str()).increment(count);
}

/// Record a poller failure.
pub fn record_ingest_error(sport: SportName) {
    counter!(INGEST_ERRORS, "sport" => sport.as_str()).increment(1);
}

/// Record the start of an initial sync round.
pub fn record_sync_attempt() {
    counter!(SYNC_ATTEMPTS).increment(1);
}

/// Record a response sent to a subscriber.
pub fn record_response_sent(kind: ResponseKind) {
    counter!(RESPONSES_SENT, "kind" => kind.as_str()).increment(1);
}

/// A subscription stream opened.
pub fn stream_opened() {
    gauge!(ACTIVE_STREAMS).increment(1.0);
}

/// A subscription stream closed.
pub fn stream_closed() {
    gauge!(ACTIVE_STREAMS).decrement(1.0);
}

/// Record a stream ending with an error.
pub fn record_stream_error(reason: &'static str) {
    counter!(STREAM_ERRORS, "reason" => reason).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
