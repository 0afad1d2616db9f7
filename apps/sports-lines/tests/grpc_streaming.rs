//! gRPC Streaming Integration Tests
//!
//! Drives a real tonic server over TCP with the generated client, backed by
//! the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};
use tonic::{Code, Streaming};

use sports_lines::{
    InMemoryLineStore, LineStore, SportName, SportsLinesServer,
    proto::{
        SubscribeOnSportsLinesRequest, SubscribeOnSportsLinesResponse, UpdateKind,
        sports_lines_service_client::SportsLinesServiceClient,
        sports_lines_service_server::SportsLinesServiceServer,
    },
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    client: SportsLinesServiceClient<Channel>,
    store: Arc<InMemoryLineStore>,
    shutdown: CancellationToken,
}

/// Start a server on an ephemeral port and connect a client to it.
async fn setup_test_server() -> TestServer {
    let store = Arc::new(InMemoryLineStore::new());
    let shutdown = CancellationToken::new();
    let server = SportsLinesServer::new(Arc::clone(&store) as Arc<dyn LineStore>, shutdown.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(SportsLinesServiceServer::new(server))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let client = SportsLinesServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    TestServer {
        client,
        store,
        shutdown,
    }
}

struct Subscription {
    requests: mpsc::Sender<SubscribeOnSportsLinesRequest>,
    responses: Streaming<SubscribeOnSportsLinesResponse>,
}

impl Subscription {
    async fn open(server: &mut TestServer) -> Self {
        let (requests, rx) = mpsc::channel(8);
        let responses = server
            .client
            .subscribe_on_sports_lines(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();
        Self {
            requests,
            responses,
        }
    }

    async fn send(&self, interval: u32, sports: &[&str]) {
        self.requests
            .send(SubscribeOnSportsLinesRequest {
                interval,
                sport_names: sports.iter().map(ToString::to_string).collect(),
            })
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Result<Option<SubscribeOnSportsLinesResponse>, tonic::Status> {
        timeout(RECV_TIMEOUT, self.responses.message())
            .await
            .expect("timed out waiting for a response")
    }

    async fn next_ok(&mut self) -> SubscribeOnSportsLinesResponse {
        self.next().await.unwrap().expect("stream ended early")
    }
}

fn lines(response: &SubscribeOnSportsLinesResponse) -> Vec<(String, f64)> {
    response
        .sport_infos
        .iter()
        .map(|info| (info.name.clone(), info.line))
        .collect()
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_snapshot_then_deltas() {
    let mut server = setup_test_server().await;
    server.store.push(SportName::Soccer, 100.0);
    server.store.push(SportName::Football, 1.5);

    let mut sub = Subscription::open(&mut server).await;
    sub.send(1, &["soccer", "football"]).await;

    let snapshot = sub.next_ok().await;
    assert_eq!(snapshot.kind(), UpdateKind::Snapshot);
    assert!(snapshot.emitted_at.is_some());
    assert_eq!(
        lines(&snapshot),
        vec![("football".to_string(), 1.5), ("soccer".to_string(), 100.0)]
    );

    server.store.push(SportName::Soccer, 97.5);

    let delta = sub.next_ok().await;
    assert_eq!(delta.kind(), UpdateKind::Delta);
    assert_eq!(
        lines(&delta),
        vec![("football".to_string(), 0.0), ("soccer".to_string(), 2.5)]
    );
}

#[tokio::test]
async fn test_repeated_request_keeps_baseline() {
    let mut server = setup_test_server().await;
    server.store.push(SportName::Football, 10.0);

    let mut sub = Subscription::open(&mut server).await;
    sub.send(1, &["football"]).await;
    assert_eq!(sub.next_ok().await.kind(), UpdateKind::Snapshot);

    server.store.push(SportName::Football, 8.0);
    assert_eq!(lines(&sub.next_ok().await), vec![("football".to_string(), 2.0)]);

    sub.send(1, &["football"]).await;
    let next = sub.next_ok().await;
    assert_eq!(next.kind(), UpdateKind::Delta);
    assert_eq!(lines(&next), vec![("football".to_string(), 2.0)]);
}

#[tokio::test]
async fn test_added_sport_sends_snapshot() {
    let mut server = setup_test_server().await;
    server.store.push(SportName::Football, 10.0);
    server.store.push(SportName::Soccer, 4.0);

    let mut sub = Subscription::open(&mut server).await;
    sub.send(1, &["football"]).await;
    assert_eq!(sub.next_ok().await.kind(), UpdateKind::Snapshot);

    sub.send(1, &["football", "soccer"]).await;

    // A delta from the first episode may already be in flight
    let snapshot = loop {
        let response = sub.next_ok().await;
        if response.kind() == UpdateKind::Snapshot {
            break response;
        }
        assert_eq!(lines(&response), vec![("football".to_string(), 0.0)]);
    };
    assert_eq!(
        lines(&snapshot),
        vec![("football".to_string(), 10.0), ("soccer".to_string(), 4.0)]
    );
}

#[tokio::test]
async fn test_half_close_completes_with_ok() {
    let mut server = setup_test_server().await;
    server.store.push(SportName::Baseball, 1.0);

    let mut sub = Subscription::open(&mut server).await;
    sub.send(1, &["baseball"]).await;
    sub.next_ok().await;
    drop(sub.requests);

    loop {
        match timeout(RECV_TIMEOUT, sub.responses.message()).await.unwrap() {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(status) => panic!("expected OK, got {status:?}"),
        }
    }
}

// =============================================================================
// Rejections
// =============================================================================

async fn expect_rejection(interval: u32, sports: &[&str]) -> tonic::Status {
    let mut server = setup_test_server().await;
    let mut sub = Subscription::open(&mut server).await;
    sub.send(interval, sports).await;
    sub.next().await.unwrap_err()
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let status = expect_rejection(0, &["soccer"]).await;
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("interval"));
}

#[tokio::test]
async fn test_missing_sports_are_rejected() {
    let status = expect_rejection(1, &[]).await;
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_unknown_sport_is_rejected() {
    let status = expect_rejection(1, &["tennis"]).await;
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("tennis"));
    assert!(status.message().contains("baseball, football, soccer"));
}

#[tokio::test]
async fn test_too_many_sports_are_rejected() {
    let status = expect_rejection(1, &["soccer", "football", "baseball", "soccer"]).await;
    assert_eq!(status.code(), Code::InvalidArgument);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_storage_outage_hides_details() {
    let mut server = setup_test_server().await;
    server.store.set_unavailable(true);

    let mut sub = Subscription::open(&mut server).await;
    sub.send(1, &["soccer"]).await;

    let status = sub.next().await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), "storage unavailable");
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let mut server = setup_test_server().await;
    server.store.push(SportName::Soccer, 1.0);

    let mut sub = Subscription::open(&mut server).await;
    sub.send(30, &["soccer"]).await;
    sub.next_ok().await;

    server.shutdown.cancel();

    let status = sub.next().await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), "server shutting down");
}

#[tokio::test]
async fn test_streams_are_independent() {
    let mut server = setup_test_server().await;
    server.store.push(SportName::Soccer, 5.0);
    server.store.push(SportName::Baseball, 6.0);

    let mut first = Subscription::open(&mut server).await;
    let mut second = Subscription::open(&mut server).await;
    first.send(1, &["soccer"]).await;
    second.send(1, &["tennis"]).await;

    assert_eq!(second.next().await.unwrap_err().code(), Code::InvalidArgument);
    assert_eq!(lines(&first.next_ok().await), vec![("soccer".to_string(), 5.0)]);
    assert_eq!(lines(&first.next_ok().await), vec![("soccer".to_string(), 0.0)]);
}
