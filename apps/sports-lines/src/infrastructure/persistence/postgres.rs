//! PostgreSQL line store.
//!
//! Each sport has its own append-only table. Statements are fixed per sport
//! and chosen by matching on [`SportName`]; line values are always bound as
//! parameters.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{LineStore, StoreError};
use crate::application::services::retry::{RetryConfig, RetryPolicy};
use crate::domain::sport::SportName;
use crate::infrastructure::config::DatabaseSettings;

/// How long a caller waits for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Why [`PostgresLineStore::connect`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Every attempt failed; carries the last error.
    #[error(transparent)]
    Unreachable(#[from] StoreError),
    /// Shutdown was requested while connecting.
    #[error("storage connection cancelled")]
    Cancelled,
}

/// Statements for one sport's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SportStatements {
    create: &'static str,
    insert: &'static str,
    latest: &'static str,
}

const fn statements(sport: SportName) -> SportStatements {
    match sport {
        SportName::Baseball => SportStatements {
            create: "CREATE TABLE IF NOT EXISTS baseballs \
                     (id BIGSERIAL PRIMARY KEY, line DOUBLE PRECISION NOT NULL)",
            insert: "INSERT INTO baseballs (line) VALUES ($1)",
            latest: "SELECT line FROM baseballs ORDER BY id DESC LIMIT 1",
        },
        SportName::Football => SportStatements {
            create: "CREATE TABLE IF NOT EXISTS footballs \
                     (id BIGSERIAL PRIMARY KEY, line DOUBLE PRECISION NOT NULL)",
            insert: "INSERT INTO footballs (line) VALUES ($1)",
            latest: "SELECT line FROM footballs ORDER BY id DESC LIMIT 1",
        },
        SportName::Soccer => SportStatements {
            create: "CREATE TABLE IF NOT EXISTS soccers \
                     (id BIGSERIAL PRIMARY KEY, line DOUBLE PRECISION NOT NULL)",
            insert: "INSERT INTO soccers (line) VALUES ($1)",
            latest: "SELECT line FROM soccers ORDER BY id DESC LIMIT 1",
        },
    }
}

/// Build connection options without assembling a URL by hand.
#[must_use]
pub fn connect_options(settings: &DatabaseSettings) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .database(&settings.name);

    match &settings.password {
        Some(password) => options.password(password),
        None => options,
    }
}

/// `LineStore` backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLineStore {
    pool: PgPool,
}

impl PostgresLineStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool, retrying the first connection per `retry`.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Unreachable`] with the last connection error once the
    /// attempts are spent, [`ConnectError::Cancelled`] on shutdown.
    pub async fn connect(
        settings: &DatabaseSettings,
        retry: RetryConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        let mut policy = RetryPolicy::new(retry);

        loop {
            let connecting = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(connect_options(settings));

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ConnectError::Cancelled),
                result = connecting => result,
            };

            match result {
                Ok(pool) => {
                    tracing::info!(
                        host = %settings.host,
                        port = settings.port,
                        database = %settings.name,
                        "Connected to storage"
                    );
                    return Ok(Self::from_pool(pool));
                }
                Err(e) => {
                    let error = map_sqlx_error(&e);
                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(
                            attempts = policy.failed_attempts(),
                            error = %error,
                            "Cannot connect to storage, check the DATABASE_* settings"
                        );
                        return Err(error.into());
                    };
                    tracing::warn!(
                        attempt = policy.failed_attempts(),
                        max_attempts = policy.max_attempts(),
                        delay_secs = delay.as_secs_f64(),
                        error = %error,
                        "Cannot connect to storage, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(ConnectError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Create any missing line tables. Existing data is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement's error.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for sport in SportName::ALL {
            sqlx::query(statements(sport).create)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(&e))?;
        }
        tracing::info!("Line tables ensured");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LineStore for PostgresLineStore {
    async fn append_line(&self, sport: SportName, line: f64) -> Result<(), StoreError> {
        sqlx::query(statements(sport).insert)
            .bind(line)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        Ok(())
    }

    async fn latest_line(&self, sport: SportName) -> Result<f64, StoreError> {
        sqlx::query_scalar::<_, f64>(statements(sport).latest)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&e))?
            .ok_or(StoreError::NotFound(sport))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        Ok(())
    }
}

fn map_sqlx_error(error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(error.to_string()),
        _ => StoreError::Query(error.to_string()),
    }
}
