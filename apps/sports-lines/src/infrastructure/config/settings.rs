//! Service Configuration Settings
//!
//! Configuration types for the service, loaded from environment variables.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::retry::RetryConfig;
use crate::domain::sport::SportName;

/// Server bind settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// gRPC bind address.
    pub grpc_host: IpAddr,
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health/metrics HTTP bind address.
    pub http_host: IpAddr,
    /// Health/metrics HTTP port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            grpc_port: 9001,
            http_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 9000,
        }
    }
}

impl ServerSettings {
    /// Socket address for the gRPC server.
    #[must_use]
    pub const fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.grpc_host, self.grpc_port)
    }

    /// Socket address for the health server.
    #[must_use]
    pub const fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.http_port)
    }
}

/// Lines provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Base URL; the sport name is appended to it.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1/lines/".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Startup retry settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Rounds the initial sync may take.
    pub first_sync_attempts: u32,
    /// Delay between initial sync rounds.
    pub first_sync_interval: Duration,
    /// Attempts to open the storage connection pool.
    pub storage_connect_attempts: u32,
    /// Delay after the first failed storage connection attempt.
    pub storage_connect_interval: Duration,
    /// Upper bound on the delay between storage connection attempts.
    pub storage_connect_max_interval: Duration,
    /// Growth factor for the storage connection delay (1.0 keeps it fixed).
    pub storage_connect_multiplier: f64,
    /// Randomization of the storage connection delay, as a fraction.
    pub storage_connect_jitter: f64,
}

impl SyncSettings {
    /// Retry policy for the initial sync rounds: a fixed delay.
    #[must_use]
    pub const fn first_sync_retry(&self) -> RetryConfig {
        RetryConfig::fixed(self.first_sync_interval, self.first_sync_attempts)
    }

    /// Retry policy for opening the storage pool.
    #[must_use]
    pub fn storage_connect_retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: self.storage_connect_interval,
            max_delay: self
                .storage_connect_max_interval
                .max(self.storage_connect_interval),
            multiplier: self.storage_connect_multiplier,
            jitter_factor: self.storage_connect_jitter,
            max_attempts: self.storage_connect_attempts,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            first_sync_attempts: 3,
            first_sync_interval: Duration::from_secs(1),
            storage_connect_attempts: 3,
            storage_connect_interval: Duration::from_secs(1),
            storage_connect_max_interval: Duration::from_secs(30),
            storage_connect_multiplier: 1.0,
            storage_connect_jitter: 0.0,
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Password, if the role has one.
    pub password: Option<String>,
    /// Database name.
    pub name: String,
    /// Pool size.
    pub max_connections: u32,
    /// Create the line tables if they are missing.
    pub create_schema: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            name: "sports_lines".to_string(),
            max_connections: 10,
            create_schema: false,
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("create_schema", &self.create_schema)
            .finish()
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Server bind settings.
    pub server: ServerSettings,
    /// Lines provider settings.
    pub provider: ProviderSettings,
    /// Startup retry settings.
    pub sync: SyncSettings,
    /// Polling interval per sport. Every supported sport is present.
    pub poll_intervals: BTreeMap<SportName, Duration>,
    /// Database settings.
    pub database: DatabaseSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            provider: ProviderSettings::default(),
            sync: SyncSettings::default(),
            poll_intervals: SportName::ALL
                .into_iter()
                .map(|sport| (sport, Duration::from_secs(1)))
                .collect(),
            database: DatabaseSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or a value that must be
    /// positive is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env(&lookup);

        let server = ServerSettings {
            grpc_host: env.parse("SPORTS_LINES_GRPC_HOST", defaults.server.grpc_host)?,
            grpc_port: env.non_zero("SPORTS_LINES_GRPC_PORT", defaults.server.grpc_port)?,
            http_host: env.parse("SPORTS_LINES_HTTP_HOST", defaults.server.http_host)?,
            http_port: env.non_zero("SPORTS_LINES_HTTP_PORT", defaults.server.http_port)?,
        };

        let base_url = env.string("LINES_PROVIDER_URL", &defaults.provider.base_url);
        if base_url.is_empty() {
            return Err(ConfigError::EmptyValue("LINES_PROVIDER_URL".to_string()));
        }
        let provider = ProviderSettings {
            base_url,
            timeout: env.secs("LINES_PROVIDER_TIMEOUT_SECS", defaults.provider.timeout)?,
        };

        let sync = SyncSettings {
            first_sync_attempts: env.non_zero(
                "FIRST_SYNC_NUM_OF_ATTEMPTS",
                defaults.sync.first_sync_attempts,
            )?,
            first_sync_interval: env.secs(
                "FIRST_SYNC_INTERVAL_BW_ATTEMPTS_SECS",
                defaults.sync.first_sync_interval,
            )?,
            storage_connect_attempts: env.non_zero(
                "STORAGE_CONN_NUM_OF_ATTEMPTS",
                defaults.sync.storage_connect_attempts,
            )?,
            storage_connect_interval: env.secs(
                "STORAGE_CONN_INTERVAL_BW_ATTEMPTS_SECS",
                defaults.sync.storage_connect_interval,
            )?,
            storage_connect_max_interval: env.secs(
                "STORAGE_CONN_MAX_INTERVAL_SECS",
                defaults.sync.storage_connect_max_interval,
            )?,
            storage_connect_multiplier: env.bounded(
                "STORAGE_CONN_BACKOFF_MULTIPLIER",
                defaults.sync.storage_connect_multiplier,
                1.0..=10.0,
            )?,
            storage_connect_jitter: env.bounded(
                "STORAGE_CONN_JITTER",
                defaults.sync.storage_connect_jitter,
                0.0..=1.0,
            )?,
        };

        let mut poll_intervals = BTreeMap::new();
        for sport in SportName::ALL {
            let key = poll_interval_key(sport);
            poll_intervals.insert(sport, env.secs(&key, defaults.poll_intervals[&sport])?);
        }

        let database = DatabaseSettings {
            host: env.string("DATABASE_HOST", &defaults.database.host),
            port: env.non_zero("DATABASE_PORT", defaults.database.port)?,
            user: env.string("DATABASE_USER", &defaults.database.user),
            password: lookup("DATABASE_PASSWORD").filter(|p| !p.is_empty()),
            name: env.string("DATABASE_NAME", &defaults.database.name),
            max_connections: env.non_zero(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database.max_connections,
            )?,
            create_schema: env.flag("DATABASE_CREATE_SCHEMA", defaults.database.create_schema)?,
        };

        Ok(Self {
            server,
            provider,
            sync,
            poll_intervals,
            database,
        })
    }

    /// Polling interval for a sport.
    #[must_use]
    pub fn poll_interval(&self, sport: SportName) -> Duration {
        self.poll_intervals
            .get(&sport)
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Environment variable holding a sport's polling interval.
#[must_use]
pub fn poll_interval_key(sport: SportName) -> String {
    format!("POLL_INTERVAL_{}_SECS", sport.as_str().to_uppercase())
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn non_zero<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq + ToString,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn bounded(
        &self,
        key: &str,
        default: f64,
        range: RangeInclusive<f64>,
    ) -> Result<f64, ConfigError> {
        let value = self.parse(key, default)?;
        if !range.contains(&value) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                reason: format!("must be between {} and {}", range.start(), range.end()),
            });
        }
        Ok(value)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.non_zero(key, default.as_secs())
            .map(Duration::from_secs)
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match (self.0)(key).map(|v| v.trim().to_lowercase()) {
            None => Ok(default),
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) if v == "false" || v == "0" => Ok(false),
            Some(v) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
                reason: "expected true or false".to_string(),
            }),
        }
    }
}
