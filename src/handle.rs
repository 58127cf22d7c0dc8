//! Caller-facing handle to one named database.

use crate::db::{ExecResult, QueryParam, Row, Rows, StatementInfo, Transaction};
use crate::error::{DbError, DbResult};
use crate::interceptor::{self, CallContext, InterceptorKind, Layer, SpyInterceptor};
use std::fmt;

/// Entry point into a connection's interceptor chain, bound to a
/// [`CallContext`].
///
/// Handles are cheap to clone and can be created for every request.
#[derive(Clone)]
pub struct Handle {
    name: String,
    head: Layer,
    ctx: CallContext,
}

impl Handle {
    pub(crate) fn new(name: impl Into<String>, head: Layer, ctx: CallContext) -> Self {
        Self {
            name: name.into(),
            head,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Same connection, different context.
    pub fn with_context(&self, ctx: CallContext) -> Self {
        Self {
            ctx,
            ..self.clone()
        }
    }

    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        self.head.query(&self.ctx, sql, params).await
    }

    /// First row of the result, `None` when the statement returned no rows.
    pub async fn query_row(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        self.head.query_row(&self.ctx, sql, params).await
    }

    pub async fn exec(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        self.head.exec(&self.ctx, sql, params).await
    }

    pub async fn prepare(&self, sql: &str) -> DbResult<StatementInfo> {
        self.head.prepare(&self.ctx, sql).await
    }

    pub async fn begin(&self) -> DbResult<Transaction> {
        self.head.begin(&self.ctx).await
    }

    /// First row of `table` in `order_by` order.
    ///
    /// Both names are identifiers, not SQL fragments: only
    /// `[A-Za-z0-9_]` and `.` separators are accepted.
    pub async fn first(&self, table: &str, order_by: &str) -> DbResult<Option<Row>> {
        validate_identifier(table, "table")?;
        validate_identifier(order_by, "order_by")?;
        let sql = format!("SELECT * FROM {table} ORDER BY {order_by} LIMIT 1");
        self.query_row(&sql, &[]).await
    }

    /// Layer kinds from head to tail.
    pub fn layers(&self) -> Vec<InterceptorKind> {
        interceptor::layers(&self.head)
    }

    /// The first spy in this connection's chain with `label`.
    pub fn spy(&self, label: &str) -> Option<&SpyInterceptor> {
        interceptor::find_spy(&self.head, label)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("layers", &self.layers())
            .field("trace_id", &self.ctx.trace_id())
            .finish()
    }
}

fn validate_identifier(ident: &str, what: &str) -> DbResult<()> {
    let valid = !ident.is_empty()
        && ident.split('.').all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "invalid {what} identifier: '{ident}'"
        )))
    }
}
