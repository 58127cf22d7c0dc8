//! Dedicated transactions started through a handle's `begin`.
//!
//! A [`Transaction`] owns one pooled connection for its whole life. Dropping
//! it without `commit` rolls back, which is sqlx's behaviour for its own
//! transaction type.

use crate::db::executor::{mysql, postgres, sqlite};
use crate::db::params::QueryParam;
use crate::db::pool::{DbPool, WaitStats, track_wait};
use crate::db::types::{ExecResult, Rows};
use crate::error::{DbError, DbResult};
use crate::interceptor::Operation;
use sqlx::{MySql, Postgres, Sqlite};
use tracing::debug;

enum DbTransaction {
    MySql(sqlx::Transaction<'static, MySql>),
    Postgres(sqlx::Transaction<'static, Postgres>),
    SQLite(sqlx::Transaction<'static, Sqlite>),
}

/// An open transaction on one named database.
pub struct Transaction {
    name: String,
    inner: DbTransaction,
}

impl Transaction {
    /// Begin a transaction on the pool, counting the checkout as a wait when
    /// the pool is saturated.
    pub(crate) async fn begin(name: &str, pool: &DbPool, waits: &WaitStats) -> DbResult<Self> {
        let op_err = |e| DbError::operation(name, Operation::Begin, e);
        let inner = match pool {
            DbPool::MySql(p) => {
                DbTransaction::MySql(track_wait(p, waits, p.begin()).await.map_err(op_err)?)
            }
            DbPool::Postgres(p) => {
                DbTransaction::Postgres(track_wait(p, waits, p.begin()).await.map_err(op_err)?)
            }
            DbPool::SQLite(p) => {
                DbTransaction::SQLite(track_wait(p, waits, p.begin()).await.map_err(op_err)?)
            }
        };
        debug!(db = %name, "Transaction started");
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    /// Name of the database this transaction belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn exec(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let result = match &mut self.inner {
            DbTransaction::MySql(tx) => mysql::execute(&mut **tx, sql, params).await,
            DbTransaction::Postgres(tx) => postgres::execute(&mut **tx, sql, params).await,
            DbTransaction::SQLite(tx) => sqlite::execute(&mut **tx, sql, params).await,
        };
        result.map_err(|e| DbError::operation(&self.name, Operation::Exec, e))
    }

    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        let result = match &mut self.inner {
            DbTransaction::MySql(tx) => mysql::fetch_rows(&mut **tx, sql, params).await,
            DbTransaction::Postgres(tx) => postgres::fetch_rows(&mut **tx, sql, params).await,
            DbTransaction::SQLite(tx) => sqlite::fetch_rows(&mut **tx, sql, params).await,
        };
        result.map_err(|e| DbError::operation(&self.name, Operation::Query, e))
    }

    pub async fn commit(self) -> DbResult<()> {
        let result = match self.inner {
            DbTransaction::MySql(tx) => tx.commit().await,
            DbTransaction::Postgres(tx) => tx.commit().await,
            DbTransaction::SQLite(tx) => tx.commit().await,
        };
        debug!(db = %self.name, success = result.is_ok(), "Transaction committed");
        result.map_err(|e| DbError::operation(&self.name, Operation::Commit, e))
    }

    pub async fn rollback(self) -> DbResult<()> {
        let result = match self.inner {
            DbTransaction::MySql(tx) => tx.rollback().await,
            DbTransaction::Postgres(tx) => tx.rollback().await,
            DbTransaction::SQLite(tx) => tx.rollback().await,
        };
        debug!(db = %self.name, success = result.is_ok(), "Transaction rolled back");
        result.map_err(|e| DbError::operation(&self.name, Operation::Rollback, e))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.inner {
            DbTransaction::MySql(_) => "mysql",
            DbTransaction::Postgres(_) => "postgres",
            DbTransaction::SQLite(_) => "sqlite",
        };
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("backend", &backend)
            .finish()
    }
}
