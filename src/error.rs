//! Error types for dbhub.
//!
//! Every failure surfaced by the client, the interceptor chain or the stats
//! sampler is a [`DbError`]. Callers can tell configuration mistakes
//! ([`DbError::NotFound`], [`DbError::Configuration`]) apart from runtime
//! failures of a configured database ([`DbError::Connection`],
//! [`DbError::Operation`], ...). Driver failures keep the original
//! `sqlx::Error` reachable through [`std::error::Error::source`].

use crate::interceptor::Operation;
use crate::interceptor::context::CancelReason;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Database '{name}' is not registered")]
    NotFound { name: String },

    #[error("Connection failed for '{name}': {message}")]
    Connection {
        name: String,
        message: String,
        suggestion: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("{operation} on '{name}' failed: {source}")]
    Operation {
        name: String,
        operation: Operation,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} on '{name}' was not issued: {reason}")]
    Cancelled {
        name: String,
        operation: Operation,
        reason: CancelReason,
    },

    #[error("Timeout: {operation} on '{name}' exceeded {elapsed_ms}ms")]
    Timeout {
        name: String,
        operation: Operation,
        elapsed_ms: u64,
    },

    #[error("Shutdown error for '{name}': {message}")]
    Shutdown { name: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a not-found error for an unregistered database name.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: Option<sqlx::Error>,
    ) -> Self {
        Self::Connection {
            name: name.into(),
            message: message.into(),
            suggestion: suggestion.into(),
            source,
        }
    }

    /// Wrap a driver failure for one operation.
    pub fn operation(name: impl Into<String>, operation: Operation, source: sqlx::Error) -> Self {
        Self::Operation {
            name: name.into(),
            operation,
            source,
        }
    }

    pub fn cancelled(name: impl Into<String>, operation: Operation, reason: CancelReason) -> Self {
        Self::Cancelled {
            name: name.into(),
            operation,
            reason,
        }
    }

    pub fn timeout(name: impl Into<String>, operation: Operation, limit: Duration) -> Self {
        Self::Timeout {
            name: name.into(),
            operation,
            elapsed_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn shutdown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shutdown {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::NotFound { .. } => Some("Register the database in the client options"),
            _ => None,
        }
    }

    /// True when the name was never configured (a programming or config error).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for cancellation and deadline short-circuits.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The underlying driver error, when the failure came from sqlx.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Operation { source, .. } => Some(source),
            Self::Connection { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// True when the driver reported that the pool had already been closed.
    pub fn is_pool_closed(&self) -> bool {
        matches!(self.driver_error(), Some(sqlx::Error::PoolClosed))
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Operation { source, .. } => matches!(
                source,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("main", "Failed to connect", "Check credentials", None);
        assert!(err.to_string().contains("Connection failed"));
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        let missing = DbError::not_found("reporting");
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        let failing = DbError::operation("reporting", Operation::Exec, sqlx::Error::PoolClosed);
        assert!(!failing.is_not_found());
    }

    #[test]
    fn test_operation_error_keeps_driver_source() {
        let err = DbError::operation("main", Operation::Query, sqlx::Error::RowNotFound);
        let source = err.source().expect("driver error should be the source");
        assert!(source.downcast_ref::<sqlx::Error>().is_some());
        assert!(matches!(err.driver_error(), Some(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_pool_closed_detection() {
        let err = DbError::operation("main", Operation::Exec, sqlx::Error::PoolClosed);
        assert!(err.is_pool_closed());
        assert!(!DbError::not_found("main").is_pool_closed());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("main", Operation::Query, Duration::from_secs(1)).is_retryable());
        assert!(DbError::connection("main", "err", "sugg", None).is_retryable());
        assert!(
            DbError::operation("main", Operation::Exec, sqlx::Error::PoolTimedOut).is_retryable()
        );
        assert!(!DbError::configuration("bad").is_retryable());
    }

    #[test]
    fn test_cancelled_display() {
        let err = DbError::cancelled("main", Operation::Exec, CancelReason::DeadlineExceeded);
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("deadline"));
    }

    #[test]
    fn test_timeout_saturates_elapsed_ms() {
        let err = DbError::timeout("main", Operation::Query, Duration::MAX);
        assert!(matches!(err, DbError::Timeout { elapsed_ms: u64::MAX, .. }));

        let err = DbError::timeout("main", Operation::Query, Duration::from_millis(1500));
        assert!(matches!(err, DbError::Timeout { elapsed_ms: 1500, .. }));
    }
}
