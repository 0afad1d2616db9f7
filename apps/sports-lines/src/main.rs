//! Sports Lines Binary
//!
//! Syncs storage with the lines provider, keeps it current with one poller
//! per sport, and serves subscription streams over gRPC.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sports-lines
//! ```
//!
//! # Environment Variables
//!
//! - `SPORTS_LINES_GRPC_HOST` / `SPORTS_LINES_GRPC_PORT`: gRPC bind (default: 0.0.0.0:9001)
//! - `SPORTS_LINES_HTTP_HOST` / `SPORTS_LINES_HTTP_PORT`: health bind (default: 0.0.0.0:9000)
//! - `LINES_PROVIDER_URL`: provider base URL, sport name appended
//! - `FIRST_SYNC_NUM_OF_ATTEMPTS`, `FIRST_SYNC_INTERVAL_BW_ATTEMPTS_SECS`: initial sync retries
//! - `STORAGE_CONN_NUM_OF_ATTEMPTS`, `STORAGE_CONN_INTERVAL_BW_ATTEMPTS_SECS`: storage connect retries
//! - `STORAGE_CONN_MAX_INTERVAL_SECS`, `STORAGE_CONN_BACKOFF_MULTIPLIER`, `STORAGE_CONN_JITTER`: storage connect backoff
//! - `POLL_INTERVAL_{BASEBALL,FOOTBALL,SOCCER}_SECS`: per-sport polling interval
//! - `DATABASE_*`: PostgreSQL connection, `DATABASE_CREATE_SCHEMA=true` creates missing tables
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: tracing export
//! - `RUST_LOG`: log filter (default: sports_lines=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sports_lines::infrastructure::grpc::proto::sportslines::v1::sports_lines_service_server::SportsLinesServiceServer;
use sports_lines::infrastructure::health::{HealthMonitor, HealthServer, HealthServerState};
use sports_lines::infrastructure::telemetry;
use sports_lines::{
    ConnectError, HttpLineFeed, InitialSync, InitialSyncError, LineFeed, LineStore,
    PostgresLineStore, ReadinessState, ServiceConfig, SportName, SportPoller, SportsLinesServer,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Server;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fails only if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Sports Lines");

    init_metrics().context("failed to install Prometheus recorder")?;

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();
    tokio::spawn(await_shutdown(shutdown.clone()));

    // Storage
    let postgres = match PostgresLineStore::connect(
        &config.database,
        config.sync.storage_connect_retry(),
        &shutdown,
    )
    .await
    {
        Ok(postgres) => postgres,
        Err(ConnectError::Cancelled) => {
            tracing::info!("Shutdown requested while connecting to storage");
            return Ok(());
        }
        Err(e) => return Err(e).context("storage unreachable"),
    };
    if config.database.create_schema {
        postgres
            .ensure_schema()
            .await
            .context("failed to create line tables")?;
    }
    let store: Arc<dyn LineStore> = Arc::new(postgres.clone());

    // Health server
    let readiness = Arc::new(ReadinessState::new());
    let mut health = HealthServer::new(
        config.server.http_addr(),
        Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&readiness),
            Arc::clone(&store),
        )),
        shutdown.clone(),
    )
    .spawn(&tasks);

    // Initial sync
    let feed: Arc<dyn LineFeed> =
        Arc::new(HttpLineFeed::new(&config.provider).context("failed to build provider client")?);
    let sync = InitialSync::new(
        Arc::clone(&feed),
        Arc::clone(&store),
        SportName::ALL.to_vec(),
        config.sync.first_sync_retry(),
    );

    let synced = sync.run(&shutdown).await;
    if let Err(InitialSyncError::Exhausted { errors, .. }) = &synced {
        for error in errors {
            tracing::error!(sport = %error.sport, error = %error.source, "Initial sync error");
        }
    }
    if let Err(e) = synced {
        drain(&shutdown, &[&tasks]).await;
        postgres.close().await;
        check_health(&mut health)?;
        return match e {
            InitialSyncError::Cancelled => Ok(()),
            InitialSyncError::Exhausted { .. } => Err(e.into()),
        };
    }
    readiness.mark_synced();

    // Pollers
    for sport in SportName::ALL {
        let poller = SportPoller::new(
            sport,
            config.poll_interval(sport),
            Arc::clone(&feed),
            Arc::clone(&store),
        );
        tasks.spawn(poller.run(shutdown.clone()));
    }

    // gRPC server
    let grpc_server = SportsLinesServer::new(Arc::clone(&store), shutdown.clone());
    let sessions = grpc_server.sessions();
    let grpc_addr = config.server.grpc_addr();

    tracing::info!(addr = %grpc_addr, "gRPC server listening");
    let served = Server::builder()
        .add_service(SportsLinesServiceServer::new(grpc_server))
        .serve_with_shutdown(grpc_addr, shutdown.clone().cancelled_owned())
        .await;
    tracing::info!("gRPC server stopped");

    drain(&shutdown, &[&tasks, &sessions]).await;
    postgres.close().await;

    check_health(&mut health)?;
    served.context("gRPC server failed")?;
    tracing::info!("Sports Lines stopped");
    Ok(())
}

/// Cancel everything and wait for tracked tasks, up to [`SHUTDOWN_TIMEOUT`].
async fn drain(shutdown: &CancellationToken, trackers: &[&TaskTracker]) {
    shutdown.cancel();

    let wait_all = async {
        for tracker in trackers {
            tracker.close();
            tracker.wait().await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Tasks still running at shutdown timeout"
        );
    }
}

/// A failed health server stops the service like a signal does, but the
/// exit must still be an error.
fn check_health(health: &mut HealthMonitor) -> anyhow::Result<()> {
    match health.failure() {
        Some(e) => Err(e).context("health server failed"),
        None => Ok(()),
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        grpc_addr = %config.server.grpc_addr(),
        http_addr = %config.server.http_addr(),
        provider_url = %config.provider.base_url,
        first_sync_attempts = config.sync.first_sync_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        database = ?config.database,
        poll_intervals = ?config.poll_intervals,
        "Configuration details"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
