//! Delta emission task.
//!
//! One task per subscription episode. It reads the latest value of every
//! subscribed sport, sends `baseline - latest` for each, sleeps the interval
//! and repeats. The baseline never moves while the task runs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use super::proto::sportslines::v1::{SportInfo, SubscribeOnSportsLinesResponse, UpdateKind};
use super::session::SessionError;
use crate::application::ports::LineStore;
use crate::domain::sport::SportName;
use crate::domain::subscription::{Baseline, compute_delta};
use crate::infrastructure::metrics::{self, ResponseKind};

/// Outbound half of a subscription stream.
pub type ResponseSender = mpsc::Sender<Result<SubscribeOnSportsLinesResponse, Status>>;

pub(crate) fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

/// Send one response, stamped with the current time.
///
/// # Errors
///
/// [`SessionError::ClientGone`] if the client stopped reading.
pub(crate) async fn send_update(
    outbound: &ResponseSender,
    kind: ResponseKind,
    sport_infos: Vec<SportInfo>,
) -> Result<(), SessionError> {
    let response = SubscribeOnSportsLinesResponse {
        sport_infos,
        kind: match kind {
            ResponseKind::Snapshot => UpdateKind::Snapshot,
            ResponseKind::Delta => UpdateKind::Delta,
        }
        .into(),
        emitted_at: Some(datetime_to_timestamp(Utc::now())),
    };

    outbound
        .send(Ok(response))
        .await
        .map_err(|_| SessionError::ClientGone)?;
    metrics::record_response_sent(kind);
    Ok(())
}

/// Periodic delta sender for one subscription episode.
pub struct EmissionTask {
    interval: Duration,
    sports: BTreeSet<SportName>,
    baseline: Baseline,
    store: Arc<dyn LineStore>,
    outbound: ResponseSender,
    errors: mpsc::Sender<SessionError>,
}

impl EmissionTask {
    /// Create a task; nothing runs until [`EmissionTask::spawn`].
    #[must_use]
    pub fn new(
        interval: Duration,
        sports: BTreeSet<SportName>,
        baseline: Baseline,
        store: Arc<dyn LineStore>,
        outbound: ResponseSender,
        errors: mpsc::Sender<SessionError>,
    ) -> Self {
        Self {
            interval,
            sports,
            baseline,
            store,
            outbound,
            errors,
        }
    }

    /// Start emitting. The first delta is sent immediately.
    #[must_use]
    pub fn spawn(self) -> EmissionHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        EmissionHandle { cancel, join }
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = self.tick() => result,
            };

            if let Err(e) = result {
                tracing::debug!(error = %e, "Emission stopped");
                // Capacity covers one report per source; a full channel
                // means the session is already terminating.
                let _ = self.errors.try_send(e);
                return;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = self.outbound.closed() => {
                    let _ = self.errors.try_send(SessionError::ClientGone);
                    return;
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn tick(&self) -> Result<(), SessionError> {
        let mut sport_infos = Vec::with_capacity(self.sports.len());

        for &sport in &self.sports {
            let latest = self.store.latest_line(sport).await?;
            // A sport without a baseline reports no movement.
            let baseline = self.baseline.get(&sport).copied().unwrap_or(latest);
            sport_infos.push(SportInfo {
                name: sport.to_string(),
                line: compute_delta(baseline, latest),
            });
        }

        send_update(&self.outbound, ResponseKind::Delta, sport_infos).await
    }
}

/// Control handle for a running [`EmissionTask`].
#[derive(Debug)]
pub struct EmissionHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl EmissionHandle {
    /// Cancel the task and wait until it has fully stopped.
    ///
    /// Once this returns the task sends nothing more.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "Emission task panicked");
        }
    }
}
