//! Per-stream subscription session.
//!
//! The session owns the receive loop for one bidirectional stream and at most
//! one [`EmissionHandle`]. Every inbound event stops the running emitter and
//! waits for it before anything else happens, so two emitters never send on
//! the same stream.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use uuid::Uuid;

use super::emitter::{EmissionHandle, EmissionTask, ResponseSender, send_update};
use super::proto::sportslines::v1::{SportInfo, SubscribeOnSportsLinesRequest};
use crate::application::ports::{LineStore, StoreError};
use crate::domain::sport::SportName;
use crate::domain::subscription::{Baseline, Subscription, SubscriptionError, Transition};
use crate::infrastructure::metrics::{self, ResponseKind};

/// One slot for the emitter, one spare.
const ERROR_CHANNEL_CAPACITY: usize = 2;

// =============================================================================
// Errors
// =============================================================================

/// Why a session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request was rejected.
    #[error(transparent)]
    Validation(#[from] SubscriptionError),
    /// Reading line values failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// The inbound half of the stream failed.
    #[error("stream transport failure: {0}")]
    Transport(Status),
    /// The service is shutting down.
    #[error("server shutting down")]
    Shutdown,
    /// The client stopped reading responses.
    #[error("client stopped reading")]
    ClientGone,
}

impl SessionError {
    /// Status to end the stream with. `None` when nobody is listening.
    ///
    /// Storage and transport details stay in the logs.
    #[must_use]
    pub fn into_status(self) -> Option<Status> {
        match self {
            Self::Validation(e) => Some(Status::invalid_argument(e.to_string())),
            Self::Storage(e @ StoreError::NotFound(_)) => Some(Status::not_found(e.to_string())),
            Self::Storage(_) => Some(Status::unavailable("storage unavailable")),
            Self::Transport(_) => Some(Status::unknown("stream transport failure")),
            Self::Shutdown => Some(Status::unavailable("server shutting down")),
            Self::ClientGone => None,
        }
    }

    /// Metric label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Transport(_) => "transport",
            Self::Shutdown => "shutdown",
            Self::ClientGone => "client_gone",
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// State machine for one subscription stream.
pub struct StreamSession<S> {
    id: Uuid,
    inbound: S,
    outbound: ResponseSender,
    store: Arc<dyn LineStore>,
    shutdown: CancellationToken,
    prev: BTreeSet<SportName>,
    baseline: Baseline,
    emitter: Option<EmissionHandle>,
    errors_tx: mpsc::Sender<SessionError>,
    errors_rx: mpsc::Receiver<SessionError>,
}

impl<S> StreamSession<S>
where
    S: Stream<Item = Result<SubscribeOnSportsLinesRequest, Status>> + Unpin + Send,
{
    /// Create a session over the two halves of a stream.
    #[must_use]
    pub fn new(
        inbound: S,
        outbound: ResponseSender,
        store: Arc<dyn LineStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            inbound,
            outbound,
            store,
            shutdown,
            prev: BTreeSet::new(),
            baseline: Baseline::new(),
            emitter: None,
            errors_tx,
            errors_rx,
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Drive the stream to completion and send its final status.
    pub async fn run(mut self) {
        metrics::stream_opened();
        tracing::info!(session_id = %self.id, "Stream opened");

        let result = self.receive_loop().await;
        self.stop_emitter().await;
        metrics::stream_closed();

        let Err(e) = result else {
            tracing::info!(session_id = %self.id, "Stream closed by client");
            return;
        };

        metrics::record_stream_error(e.reason());
        match &e {
            SessionError::Validation(_) => {
                tracing::info!(session_id = %self.id, error = %e, "Subscription rejected");
            }
            SessionError::ClientGone | SessionError::Shutdown => {
                tracing::info!(session_id = %self.id, reason = e.reason(), "Stream ended");
            }
            SessionError::Storage(_) | SessionError::Transport(_) => {
                tracing::warn!(session_id = %self.id, error = %e, "Stream failed");
            }
        }

        if let Some(status) = e.into_status() {
            // The client may already be gone.
            let _ = self.outbound.send(Err(status)).await;
        }
    }

    async fn receive_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(SessionError::Shutdown),
                Some(e) = self.errors_rx.recv() => return Err(e),
                next = self.inbound.next() => next,
            };

            self.stop_emitter().await;

            match next {
                None => return Ok(()),
                Some(Err(status)) => return Err(SessionError::Transport(status)),
                Some(Ok(request)) => self.apply(request).await?,
            }
        }
    }

    async fn apply(&mut self, request: SubscribeOnSportsLinesRequest) -> Result<(), SessionError> {
        let subscription = Subscription::validate(request.interval, &request.sport_names)?;
        let transition = Transition::between(&self.prev, &subscription.sports);

        tracing::debug!(
            session_id = %self.id,
            interval_secs = subscription.interval.as_secs(),
            sports = ?subscription.sports,
            ?transition,
            "Subscription accepted"
        );

        if transition == Transition::Snapshot {
            self.baseline = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(SessionError::Shutdown),
                baseline = send_snapshot(self.store.as_ref(), &self.outbound, &subscription.sports) => baseline?,
            };

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(SessionError::Shutdown),
                () = self.outbound.closed() => return Err(SessionError::ClientGone),
                () = tokio::time::sleep(subscription.interval) => {}
            }
        }

        self.prev.clone_from(&subscription.sports);
        self.emitter = Some(
            EmissionTask::new(
                subscription.interval,
                subscription.sports,
                self.baseline.clone(),
                Arc::clone(&self.store),
                self.outbound.clone(),
                self.errors_tx.clone(),
            )
            .spawn(),
        );
        Ok(())
    }

    async fn stop_emitter(&mut self) {
        if let Some(handle) = self.emitter.take() {
            handle.stop().await;
        }
    }
}

/// Send the absolute values of `sports` and return them as the new baseline.
async fn send_snapshot(
    store: &dyn LineStore,
    outbound: &ResponseSender,
    sports: &BTreeSet<SportName>,
) -> Result<Baseline, SessionError> {
    let mut baseline = Baseline::new();
    let mut sport_infos = Vec::with_capacity(sports.len());

    for &sport in sports {
        let line = store.latest_line(sport).await?;
        baseline.insert(sport, line);
        sport_infos.push(SportInfo {
            name: sport.to_string(),
            line,
        });
    }

    send_update(outbound, ResponseKind::Snapshot, sport_infos).await?;
    Ok(baseline)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_stream::wrappers::ReceiverStream;
    use tonic::Code;

    use super::*;
    use crate::infrastructure::grpc::proto::sportslines::v1::{
        SubscribeOnSportsLinesResponse, UpdateKind,
    };
    use crate::infrastructure::persistence::InMemoryLineStore;

    type Inbound = mpsc::Sender<Result<SubscribeOnSportsLinesRequest, Status>>;
    type Outbound = mpsc::Receiver<Result<SubscribeOnSportsLinesResponse, Status>>;

    struct Harness {
        store: Arc<InMemoryLineStore>,
        inbound: Inbound,
        outbound: Outbound,
        shutdown: CancellationToken,
        session: tokio::task::JoinHandle<()>,
    }

    fn open() -> Harness {
        let store = Arc::new(InMemoryLineStore::new());
        let (inbound, rx) = mpsc::channel(8);
        let (tx, outbound) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let session = StreamSession::new(
            ReceiverStream::new(rx),
            tx,
            Arc::clone(&store) as Arc<dyn LineStore>,
            shutdown.clone(),
        );

        Harness {
            store,
            inbound,
            outbound,
            shutdown,
            session: tokio::spawn(session.run()),
        }
    }

    fn request(interval: u32, sports: &[&str]) -> Result<SubscribeOnSportsLinesRequest, Status> {
        Ok(SubscribeOnSportsLinesRequest {
            interval,
            sport_names: sports.iter().map(ToString::to_string).collect(),
        })
    }

    async fn next_ok(h: &mut Harness) -> SubscribeOnSportsLinesResponse {
        h.outbound.recv().await.unwrap().unwrap()
    }

    async fn next_status(h: &mut Harness) -> Status {
        h.outbound.recv().await.unwrap().unwrap_err()
    }

    fn lines(response: &SubscribeOnSportsLinesResponse) -> Vec<(String, f64)> {
        response
            .sport_infos
            .iter()
            .map(|info| (info.name.clone(), info.line))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_then_deltas() {
        let mut h = open();
        h.store.push(SportName::Soccer, 100.0);

        h.inbound.send(request(1, &["soccer"])).await.unwrap();
        let snapshot = next_ok(&mut h).await;
        assert_eq!(snapshot.kind(), UpdateKind::Snapshot);
        assert_eq!(lines(&snapshot), vec![("soccer".to_string(), 100.0)]);

        h.store.push(SportName::Soccer, 97.5);
        let delta = next_ok(&mut h).await;
        assert_eq!(delta.kind(), UpdateKind::Delta);
        assert_eq!(lines(&delta), vec![("soccer".to_string(), 2.5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_set_restarts_deltas_without_snapshot() {
        let mut h = open();
        h.store.push(SportName::Football, 3.0);

        h.inbound.send(request(1, &["football"])).await.unwrap();
        assert_eq!(next_ok(&mut h).await.kind(), UpdateKind::Snapshot);
        h.store.push(SportName::Football, 2.0);
        assert_eq!(next_ok(&mut h).await.kind(), UpdateKind::Delta);

        h.inbound.send(request(5, &["football"])).await.unwrap();
        let restarted = next_ok(&mut h).await;
        assert_eq!(restarted.kind(), UpdateKind::Delta);
        assert_eq!(lines(&restarted), vec![("football".to_string(), 1.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn added_sport_sends_fresh_snapshot() {
        let mut h = open();
        h.store.push(SportName::Football, 3.0);
        h.store.push(SportName::Soccer, 7.0);

        h.inbound.send(request(1, &["football"])).await.unwrap();
        next_ok(&mut h).await;
        next_ok(&mut h).await;

        h.store.push(SportName::Football, 2.0);
        h.inbound
            .send(request(1, &["football", "soccer"]))
            .await
            .unwrap();

        let snapshot = next_ok(&mut h).await;
        assert_eq!(snapshot.kind(), UpdateKind::Snapshot);
        assert_eq!(
            lines(&snapshot),
            vec![("football".to_string(), 2.0), ("soccer".to_string(), 7.0)]
        );

        // Deltas are relative to the new snapshot
        let delta = next_ok(&mut h).await;
        assert_eq!(
            lines(&delta),
            vec![("football".to_string(), 0.0), ("soccer".to_string(), 0.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switching_sports_stops_old_emitter() {
        let mut h = open();
        h.store.push(SportName::Baseball, 1.0);
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(1, &["baseball"])).await.unwrap();
        next_ok(&mut h).await;
        next_ok(&mut h).await;

        h.inbound.send(request(1, &["soccer"])).await.unwrap();
        for _ in 0..5 {
            let response = next_ok(&mut h).await;
            assert!(response.sport_infos.iter().all(|i| i.name == "soccer"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_interval_ends_stream() {
        let mut h = open();
        h.inbound.send(request(0, &["soccer"])).await.unwrap();

        let status = next_status(&mut h).await;
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(h.outbound.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_after_valid_request_stops_emitter() {
        let mut h = open();
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(1, &["soccer"])).await.unwrap();
        next_ok(&mut h).await;
        h.inbound.send(request(1, &["tennis"])).await.unwrap();

        let mut last = None;
        while let Some(item) = h.outbound.recv().await {
            last = Some(item);
        }
        let status = last.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("tennis"));
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failure_is_opaque() {
        let mut h = open();
        h.store.set_unavailable(true);

        h.inbound.send(request(1, &["soccer"])).await.unwrap();
        let status = next_status(&mut h).await;
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "storage unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_log_is_not_found() {
        let mut h = open();
        h.inbound.send(request(1, &["baseball"])).await.unwrap();

        let status = next_status(&mut h).await;
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no line stored for baseball");
    }

    #[tokio::test(start_paused = true)]
    async fn emitter_failure_ends_stream() {
        let mut h = open();
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(1, &["soccer"])).await.unwrap();
        next_ok(&mut h).await;
        h.store.set_unavailable(true);

        assert_eq!(next_status(&mut h).await.code(), Code::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_unknown() {
        let mut h = open();
        h.inbound
            .send(Err(Status::data_loss("frame corrupted")))
            .await
            .unwrap();

        let status = next_status(&mut h).await;
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "stream transport failure");
    }

    #[tokio::test(start_paused = true)]
    async fn half_close_ends_cleanly() {
        let mut h = open();
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(1, &["soccer"])).await.unwrap();
        next_ok(&mut h).await;
        drop(h.inbound);

        while let Some(item) = h.outbound.recv().await {
            assert!(item.is_ok());
        }
        h.session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_stream() {
        let mut h = open();
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(10, &["soccer"])).await.unwrap();
        next_ok(&mut h).await;
        h.shutdown.cancel();

        let status = next_status(&mut h).await;
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "server shutting down");
    }

    #[tokio::test(start_paused = true)]
    async fn client_leaving_during_snapshot_wait_ends_session() {
        let mut h = open();
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(3600, &["soccer"])).await.unwrap();
        next_ok(&mut h).await;

        let Harness {
            inbound,
            outbound,
            session,
            ..
        } = h;
        drop(outbound);

        tokio::time::timeout(Duration::from_secs(60), session)
            .await
            .expect("session outlived its client")
            .unwrap();
        drop(inbound);
    }

    #[tokio::test(start_paused = true)]
    async fn client_leaving_between_deltas_ends_session() {
        let mut h = open();
        h.store.push(SportName::Soccer, 1.0);

        h.inbound.send(request(3600, &["soccer"])).await.unwrap();
        assert_eq!(next_ok(&mut h).await.kind(), UpdateKind::Snapshot);
        assert_eq!(next_ok(&mut h).await.kind(), UpdateKind::Delta);

        let Harness {
            inbound,
            outbound,
            session,
            ..
        } = h;
        drop(outbound);

        tokio::time::timeout(Duration::from_secs(60), session)
            .await
            .expect("session outlived its client")
            .unwrap();
        drop(inbound);
    }

    #[tokio::test(start_paused = true)]
    async fn request_burst_keeps_one_emitter() {
        let mut h = open();
        h.store.push(SportName::Football, 4.0);

        h.inbound.send(request(1, &["football"])).await.unwrap();
        assert_eq!(next_ok(&mut h).await.kind(), UpdateKind::Snapshot);

        // Queued faster than the interval, so each one restarts the emitter
        for _ in 0..8 {
            h.inbound.send(request(1, &["football"])).await.unwrap();
        }

        // The backlog is read once the snapshot wait ends
        tokio::time::sleep(Duration::from_millis(1500)).await;
        while h.outbound.try_recv().is_ok() {}

        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            let response = next_ok(&mut h).await;
            assert_eq!(response.kind(), UpdateKind::Delta);
        }
        // One emitter sends one delta per interval
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[test]
    fn client_gone_has_no_status() {
        assert!(SessionError::ClientGone.into_status().is_none());
        assert_eq!(SessionError::ClientGone.reason(), "client_gone");
    }
}
