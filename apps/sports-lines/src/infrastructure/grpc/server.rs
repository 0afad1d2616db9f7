//! gRPC Streaming Server Implementation
//!
//! Implements `SportsLinesService`: each bidirectional stream is handed to a
//! [`StreamSession`] running on its own task.

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

use super::proto::sportslines::v1::{
    SubscribeOnSportsLinesRequest, SubscribeOnSportsLinesResponse,
    sports_lines_service_server::SportsLinesService,
};
use super::session::StreamSession;
use crate::application::ports::LineStore;

// =============================================================================
// Type Aliases
// =============================================================================

type StreamResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Responses buffered per stream before the session waits on the client.
const OUTBOUND_BUFFER: usize = 16;

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC server for line subscriptions.
pub struct SportsLinesServer {
    store: Arc<dyn LineStore>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl SportsLinesServer {
    /// Create a server reading from `store`. Cancelling `shutdown` ends every
    /// open stream with `UNAVAILABLE`.
    #[must_use]
    pub fn new(store: Arc<dyn LineStore>, shutdown: CancellationToken) -> Self {
        Self {
            store,
            shutdown,
            sessions: TaskTracker::new(),
        }
    }

    /// Tracker over every session task, for waiting on shutdown.
    #[must_use]
    pub fn sessions(&self) -> TaskTracker {
        self.sessions.clone()
    }
}

#[tonic::async_trait]
impl SportsLinesService for SportsLinesServer {
    type SubscribeOnSportsLinesStream = BoxedStream<SubscribeOnSportsLinesResponse>;

    async fn subscribe_on_sports_lines(
        &self,
        request: Request<Streaming<SubscribeOnSportsLinesRequest>>,
    ) -> StreamResult<Self::SubscribeOnSportsLinesStream> {
        if self.shutdown.is_cancelled() {
            return Err(Status::unavailable("server shutting down"));
        }

        let remote_addr = request.remote_addr();
        let (tx, rx) = tokio::sync::mpsc::channel(OUTBOUND_BUFFER);

        let session = StreamSession::new(
            request.into_inner(),
            tx,
            Arc::clone(&self.store),
            self.shutdown.child_token(),
        );
        let span = tracing::info_span!(
            "subscription",
            session_id = %session.id(),
            remote_addr = ?remote_addr
        );
        self.sessions.spawn(session.run().instrument(span));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
