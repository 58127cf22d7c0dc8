//! Terminal layer: issues the real sqlx calls.

use super::{CallContext, Interceptor, InterceptorKind, Layer, Operation};
use crate::db::executor::{mysql, postgres, sqlite};
use crate::db::pool::{DbPool, WaitStats, acquire};
use crate::db::{ExecResult, QueryParam, Row, Rows, StatementInfo, Transaction};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// End of every chain.
///
/// Each call is raced against the context's cancellation and deadline; when
/// either fires first the in-flight sqlx future is dropped and the pooled
/// connection goes back to sqlx.
pub struct DriverAdapter {
    name: String,
    pool: DbPool,
    waits: Arc<WaitStats>,
    default_timeout: Option<Duration>,
}

impl DriverAdapter {
    pub fn new(
        name: impl Into<String>,
        pool: DbPool,
        waits: Arc<WaitStats>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            pool,
            waits,
            default_timeout,
        }
    }

    async fn call<T, F>(&self, ctx: &CallContext, operation: Operation, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let bounded = async {
            match self.default_timeout {
                Some(limit) => timeout(limit, fut)
                    .await
                    .unwrap_or_else(|_| Err(DbError::timeout(&self.name, operation, limit))),
                None => fut.await,
            }
        };
        ctx.run(bounded)
            .await
            .unwrap_or_else(|reason| Err(DbError::cancelled(&self.name, operation, reason)))
    }

    async fn fetch(&self, sql: &str, params: &[QueryParam]) -> Result<Rows, sqlx::Error> {
        match &self.pool {
            DbPool::MySql(p) => {
                let mut conn = acquire(p, &self.waits).await?;
                mysql::fetch_rows(&mut *conn, sql, params).await
            }
            DbPool::Postgres(p) => {
                let mut conn = acquire(p, &self.waits).await?;
                postgres::fetch_rows(&mut *conn, sql, params).await
            }
            DbPool::SQLite(p) => {
                let mut conn = acquire(p, &self.waits).await?;
                sqlite::fetch_rows(&mut *conn, sql, params).await
            }
        }
    }

    async fn fetch_row(&self, sql: &str, params: &[QueryParam]) -> Result<Option<Row>, sqlx::Error> {
        match &self.pool {
            DbPool::MySql(p) => {
                let mut conn = acquire(p, &self.waits).await?;
                mysql::fetch_row(&mut *conn, sql, params).await
            }
            DbPool::Postgres(p) => {
                let mut conn = acquire(p, &self.waits).await?;
                postgres::fetch_row(&mut *conn, sql, params).await
            }
            DbPool::SQLite(p) => {
                let mut conn = acquire(p, &self.waits).await?;
                sqlite::fetch_row(&mut *conn, sql, params).await
            }
        }
    }

    fn driver_err(&self, operation: Operation) -> impl Fn(sqlx::Error) -> DbError + '_ {
        move |e| DbError::operation(&self.name, operation, e)
    }
}

#[async_trait]
impl Interceptor for DriverAdapter {
    fn kind(&self) -> InterceptorKind {
        InterceptorKind::Driver
    }

    fn next(&self) -> Option<&Layer> {
        None
    }

    async fn query(&self, ctx: &CallContext, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        let fut = async {
            self.fetch(sql, params)
                .await
                .map_err(self.driver_err(Operation::Query))
        };
        self.call(ctx, Operation::Query, fut).await
    }

    async fn query_row(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>> {
        let fut = async {
            self.fetch_row(sql, params)
                .await
                .map_err(self.driver_err(Operation::QueryRow))
        };
        self.call(ctx, Operation::QueryRow, fut).await
    }

    async fn exec(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let fut = async {
            let result = match &self.pool {
                DbPool::MySql(p) => match acquire(p, &self.waits).await {
                    Ok(mut conn) => mysql::execute(&mut *conn, sql, params).await,
                    Err(e) => Err(e),
                },
                DbPool::Postgres(p) => match acquire(p, &self.waits).await {
                    Ok(mut conn) => postgres::execute(&mut *conn, sql, params).await,
                    Err(e) => Err(e),
                },
                DbPool::SQLite(p) => match acquire(p, &self.waits).await {
                    Ok(mut conn) => sqlite::execute(&mut *conn, sql, params).await,
                    Err(e) => Err(e),
                },
            };
            result.map_err(self.driver_err(Operation::Exec))
        };
        self.call(ctx, Operation::Exec, fut).await
    }

    async fn prepare(&self, ctx: &CallContext, sql: &str) -> DbResult<StatementInfo> {
        let fut = async {
            let result = match &self.pool {
                DbPool::MySql(p) => match acquire(p, &self.waits).await {
                    Ok(mut conn) => mysql::prepare(&mut *conn, sql).await,
                    Err(e) => Err(e),
                },
                DbPool::Postgres(p) => match acquire(p, &self.waits).await {
                    Ok(mut conn) => postgres::prepare(&mut *conn, sql).await,
                    Err(e) => Err(e),
                },
                DbPool::SQLite(p) => match acquire(p, &self.waits).await {
                    Ok(mut conn) => sqlite::prepare(&mut *conn, sql).await,
                    Err(e) => Err(e),
                },
            };
            result.map_err(self.driver_err(Operation::Prepare))
        };
        self.call(ctx, Operation::Prepare, fut).await
    }

    async fn begin(&self, ctx: &CallContext) -> DbResult<Transaction> {
        let fut = Transaction::begin(&self.name, &self.pool, &self.waits);
        self.call(ctx, Operation::Begin, fut).await
    }
}
