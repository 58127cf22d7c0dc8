//! Database access layer.
//!
//! This module wraps sqlx for the rest of the crate:
//! - Connection pools and pool statistics
//! - Statement execution per backend
//! - Parameter binding
//! - Row decoding into JSON maps
//! - Dedicated transactions

pub mod executor;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use params::QueryParam;
pub use pool::{DbPool, DriverOptions, PoolStats, WaitStats};
pub use transaction::Transaction;
pub use types::{ColumnInfo, ExecResult, Row, Rows, StatementInfo};
