//! Timing and logging layer.

use super::{CallContext, Interceptor, InterceptorKind, Layer, Operation};
use crate::db::params::param_types;
use crate::db::{ExecResult, QueryParam, Row, Rows, StatementInfo, Transaction};
use crate::error::{DbError, DbResult};
use crate::sink::MetricsSink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Histogram the layer records every call into.
pub const OPERATION_DURATION_METRIC: &str = "dbhub_operation_duration_seconds";

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationOptions {
    /// Calls slower than this are logged at `warn`.
    pub slow_threshold: Duration,
}

impl Default for InstrumentationOptions {
    fn default() -> Self {
        Self {
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

impl InstrumentationOptions {
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

/// Times every call, logs it and records its duration.
pub struct InstrumentationInterceptor {
    name: String,
    opts: InstrumentationOptions,
    debug: bool,
    metrics: Arc<dyn MetricsSink>,
    next: Layer,
}

impl InstrumentationInterceptor {
    pub fn new(
        name: String,
        opts: InstrumentationOptions,
        debug: bool,
        metrics: Arc<dyn MetricsSink>,
        next: Layer,
    ) -> Self {
        Self {
            name,
            opts,
            debug,
            metrics,
            next,
        }
    }

    async fn instrument<T, F>(
        &self,
        ctx: &CallContext,
        operation: Operation,
        sql: Option<&str>,
        params: &[QueryParam],
        call: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        if let Some(reason) = ctx.done() {
            let err = DbError::cancelled(&self.name, operation, reason);
            self.observe(ctx, operation, sql, params, Duration::ZERO, Err(&err));
            return Err(err);
        }

        let start = Instant::now();
        let result = call.await;
        self.observe(ctx, operation, sql, params, start.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    fn observe(
        &self,
        ctx: &CallContext,
        operation: Operation,
        sql: Option<&str>,
        params: &[QueryParam],
        elapsed: Duration,
        outcome: Result<(), &DbError>,
    ) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let success = outcome.is_ok();
        let status = match outcome {
            Ok(()) => "ok",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "error",
        };

        if elapsed >= self.opts.slow_threshold {
            warn!(
                db = %self.name,
                operation = %operation,
                elapsed_ms,
                success,
                trace_id = %ctx.trace_id(),
                "Slow database operation"
            );
        } else {
            debug!(
                db = %self.name,
                operation = %operation,
                elapsed_ms,
                success,
                trace_id = %ctx.trace_id(),
                "Database operation"
            );
        }

        if self.debug {
            info!(
                db = %self.name,
                operation = %operation,
                sql = sql.unwrap_or(""),
                param_types = ?param_types(params),
                "SQL"
            );
        }
        if let Err(e) = outcome {
            debug!(db = %self.name, operation = %operation, error = %e, "Operation failed");
        }

        self.metrics.record_duration(
            OPERATION_DURATION_METRIC,
            &[
                ("db", self.name.as_str()),
                ("operation", operation.as_str()),
                ("status", status),
            ],
            elapsed,
        );
    }
}

#[async_trait]
impl Interceptor for InstrumentationInterceptor {
    fn kind(&self) -> InterceptorKind {
        InterceptorKind::Instrumentation
    }

    fn next(&self) -> Option<&Layer> {
        Some(&self.next)
    }

    async fn query(&self, ctx: &CallContext, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        self.instrument(
            ctx,
            Operation::Query,
            Some(sql),
            params,
            self.next.query(ctx, sql, params),
        )
        .await
    }

    async fn query_row(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>> {
        self.instrument(
            ctx,
            Operation::QueryRow,
            Some(sql),
            params,
            self.next.query_row(ctx, sql, params),
        )
        .await
    }

    async fn exec(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        self.instrument(
            ctx,
            Operation::Exec,
            Some(sql),
            params,
            self.next.exec(ctx, sql, params),
        )
        .await
    }

    async fn prepare(&self, ctx: &CallContext, sql: &str) -> DbResult<StatementInfo> {
        self.instrument(
            ctx,
            Operation::Prepare,
            Some(sql),
            &[],
            self.next.prepare(ctx, sql),
        )
        .await
    }

    async fn begin(&self, ctx: &CallContext) -> DbResult<Transaction> {
        self.instrument(ctx, Operation::Begin, None, &[], self.next.begin(ctx))
            .await
    }
}
