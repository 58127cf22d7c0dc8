//! Configuration handling.
//!
//! Two concerns live here:
//! - [`ConfigSource`], the narrow key/value lookup the client reads runtime
//!   switches from (currently the `debug` key), with in-memory and
//!   environment-backed implementations.
//! - [`Config`], the CLI arguments and environment variables of the `dbhub`
//!   binary.

use crate::descriptor::ConnectionDescriptor;
use crate::error::DbResult;
use clap::Parser;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_SAMPLING_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Key/value lookup for runtime switches.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Interpret a key as a boolean. Accepts `true`, `1`, `yes`, `on`
    /// (case-insensitive); anything else, including a missing key, is false.
    fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }
}

/// In-memory config, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemConfig {
    values: RwLock<HashMap<String, String>>,
}

impl MemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl ToString) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.into(), value.to_string());
    }
}

impl ConfigSource for MemConfig {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }
}

/// Reads `<PREFIX>_<KEY>` environment variables, upper-cased.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key).to_ascii_uppercase()
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new("DBHUB")
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// Configuration for the `dbhub` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbhub",
    about = "Connect a set of databases and report their pool health",
    version,
    author
)]
pub struct Config {
    /// Database connections.
    /// Format: "connection_string" or "name=connection_string".
    /// Pool limits go in the query string: ?max_open=N&max_idle=N&max_lifetime=SECS
    #[arg(
        short = 'd',
        long = "database",
        value_name = "URL",
        env = "DBHUB_DATABASE",
        value_delimiter = ','
    )]
    pub databases: Vec<String>,

    /// Seconds between pool statistics samples
    #[arg(
        long,
        default_value_t = DEFAULT_SAMPLING_INTERVAL_SECS,
        env = "DBHUB_SAMPLING_INTERVAL"
    )]
    pub sampling_interval: u64,

    /// Seconds to wait for each pool to close on shutdown
    #[arg(
        long,
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        env = "DBHUB_SHUTDOWN_TIMEOUT"
    )]
    pub shutdown_timeout: u64,

    /// Seconds to wait when acquiring a pooled connection
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "DBHUB_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout: u64,

    /// Log SQL text and parameter types for every operation
    #[arg(long, env = "DBHUB_DEBUG")]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBHUB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBHUB_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            databases: Vec::new(),
            sampling_interval: DEFAULT_SAMPLING_INTERVAL_SECS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            debug: false,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Parse all database descriptors.
    pub fn parse_descriptors(&self) -> DbResult<Vec<ConnectionDescriptor>> {
        self.databases
            .iter()
            .map(|s| ConnectionDescriptor::parse(s))
            .collect()
    }

    pub fn sampling_interval_duration(&self) -> Duration {
        Duration::from_secs(self.sampling_interval)
    }

    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConfigSource for Config {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "debug" => Some(self.debug.to_string()),
            "log_level" => Some(self.log_level.clone()),
            _ => None,
        }
    }
}
