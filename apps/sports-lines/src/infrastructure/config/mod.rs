//! Configuration Module
//!
//! Configuration loading and validation for the service.

mod settings;

pub use settings::{
    ConfigError, DatabaseSettings, ProviderSettings, ServerSettings, ServiceConfig, SyncSettings,
    poll_interval_key,
};
