//! dbhub library
//!
//! A multi-database client for SQLite, PostgreSQL and MySQL. It manages a
//! named set of sqlx pools as a process-wide singleton, runs every call
//! through a per-connection chain of interceptors, and periodically publishes
//! pool health gauges.
//!
//! ```ignore
//! use dbhub::{CallContext, Client, ClientOptions, ConnectionDescriptor};
//!
//! let client = Client::get_or_init(
//!     ClientOptions::new()
//!         .with_descriptor(ConnectionDescriptor::new("orders", "sqlite:orders.db?mode=rwc")?),
//! )
//! .await?;
//! let orders = client.get_connection(&CallContext::background(), "orders")?;
//! orders.exec("CREATE TABLE IF NOT EXISTS t (id INTEGER)", &[]).await?;
//! ```

pub mod client;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod interceptor;
pub mod sink;
pub mod stats;

pub use client::{Client, ClientOptions};
pub use config::{ConfigSource, EnvConfig, MemConfig};
pub use db::{DriverOptions, ExecResult, PoolStats, QueryParam, Row, Rows, StatementInfo, Transaction};
pub use descriptor::{ConnectionDescriptor, DatabaseType};
pub use error::{DbError, DbResult};
pub use handle::Handle;
pub use interceptor::{
    CallContext, CancelReason, InterceptorFactory, InterceptorKind, Operation, SpyOptions,
};
pub use sink::{GaugeRegistry, MetricsSink, NoopSink};
pub use stats::{StatsMetric, StatsSnapshot};
