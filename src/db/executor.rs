//! Statement execution against a single checked-out connection.
//!
//! Each backend module exposes the same calls (`fetch_rows`, `fetch_row`,
//! `execute` and `prepare`) over that backend's connection type. Both pooled
//! connections and open transactions deref to the connection type, so the
//! driver adapter and [`Transaction`](crate::db::transaction::Transaction)
//! share these functions. Timeouts and cancellation are applied by the
//! callers; errors are returned as raw `sqlx::Error`.
//!
//! With no parameters the SQL is sent as-is (simple query protocol), which
//! keeps statements like `CREATE PROCEDURE` working on MySQL.

use crate::db::params::QueryParam;
use crate::db::types::{ExecResult, Row, RowToJson, Rows, StatementInfo, column_infos};
use sqlx::{Executor, Statement};

fn statement_info<'q, S: Statement<'q>>(sql: &str, stmt: &S) -> StatementInfo {
    StatementInfo {
        sql: sql.to_string(),
        columns: column_infos(stmt.columns()),
        parameter_count: stmt
            .parameters()
            .map(|p| p.either(|types| types.len(), |n| n))
            .unwrap_or(0),
    }
}

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySqlConnection;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Rows, sqlx::Error> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(Rows::from_rows(rows))
    }

    /// First row only; the rest of the result is never read.
    pub async fn fetch_row(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Option<Row>, sqlx::Error> {
        let row = if params.is_empty() {
            conn.fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_optional(conn).await?
        };
        Ok(row.map(|r| r.to_json_map()))
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecResult, sqlx::Error> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(conn).await?
        };
        let last_insert_id = i64::try_from(result.last_insert_id())
            .ok()
            .filter(|id| *id > 0);
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }

    pub async fn prepare(conn: &mut MySqlConnection, sql: &str) -> Result<StatementInfo, sqlx::Error> {
        let stmt = conn.prepare(sql).await?;
        Ok(statement_info(sql, &stmt))
    }
}

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::PgConnection;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Rows, sqlx::Error> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(Rows::from_rows(rows))
    }

    /// First row only; the rest of the result is never read.
    pub async fn fetch_row(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Option<Row>, sqlx::Error> {
        let row = if params.is_empty() {
            conn.fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch_optional(conn).await?
        };
        Ok(row.map(|r| r.to_json_map()))
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecResult, sqlx::Error> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.execute(conn).await?
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    pub async fn prepare(conn: &mut PgConnection, sql: &str) -> Result<StatementInfo, sqlx::Error> {
        let stmt = conn.prepare(sql).await?;
        Ok(statement_info(sql, &stmt))
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::SqliteConnection;

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Rows, sqlx::Error> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(Rows::from_rows(rows))
    }

    /// First row only; the rest of the result is never read.
    pub async fn fetch_row(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Option<Row>, sqlx::Error> {
        let row = if params.is_empty() {
            conn.fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_optional(conn).await?
        };
        Ok(row.map(|r| r.to_json_map()))
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecResult, sqlx::Error> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(conn).await?
        };
        let last_insert_id = Some(result.last_insert_rowid()).filter(|id| *id > 0);
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }

    pub async fn prepare(
        conn: &mut SqliteConnection,
        sql: &str,
    ) -> Result<StatementInfo, sqlx::Error> {
        let stmt = conn.prepare(sql).await?;
        Ok(statement_info(sql, &stmt))
    }
}
