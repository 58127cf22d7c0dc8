//! Recording test double.
//!
//! A [`SpyInterceptor`] records which operations went through it and the
//! shape of their arguments. It delegates by default; configured stubs answer
//! `exec`, `query` and `prepare` without reaching the database.

use super::{CallContext, Interceptor, InterceptorKind, Layer, Operation};
use crate::db::params::param_types;
use crate::db::{ExecResult, QueryParam, Row, Rows, StatementInfo, Transaction};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Oldest calls are dropped past this many.
const MAX_RECORDED_CALLS: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpyOptions {
    label: String,
    stub_exec: Option<ExecResult>,
    stub_query: Option<Rows>,
    stub_prepare: Option<StatementInfo>,
}

impl SpyOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Answer `exec` with `result` instead of delegating.
    pub fn stub_exec(mut self, result: ExecResult) -> Self {
        self.stub_exec = Some(result);
        self
    }

    /// Answer `query` and `query_row` from `rows` instead of delegating.
    pub fn stub_query(mut self, rows: Rows) -> Self {
        self.stub_query = Some(rows);
        self
    }

    pub fn stub_prepare(mut self, info: StatementInfo) -> Self {
        self.stub_prepare = Some(info);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// One call seen by a spy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    /// `None` for `begin`
    pub sql: Option<String>,
    pub param_types: Vec<&'static str>,
}

#[derive(Debug, Default)]
struct Flags {
    query: AtomicBool,
    query_row: AtomicBool,
    exec: AtomicBool,
    prepare: AtomicBool,
    begin: AtomicBool,
}

impl Flags {
    fn get(&self, operation: Operation) -> Option<&AtomicBool> {
        match operation {
            Operation::Query => Some(&self.query),
            Operation::QueryRow => Some(&self.query_row),
            Operation::Exec => Some(&self.exec),
            Operation::Prepare => Some(&self.prepare),
            Operation::Begin => Some(&self.begin),
            Operation::Commit | Operation::Rollback => None,
        }
    }
}

pub struct SpyInterceptor {
    opts: SpyOptions,
    flags: Flags,
    calls: Mutex<VecDeque<RecordedCall>>,
    next: Option<Layer>,
}

impl SpyInterceptor {
    pub fn new(opts: SpyOptions, next: Layer) -> Self {
        Self::build(opts, Some(next))
    }

    /// A spy that ends a chain on its own. Operations without a stub fail
    /// with `InvalidInput`.
    pub fn terminal(opts: SpyOptions) -> Self {
        Self::build(opts, None)
    }

    fn build(opts: SpyOptions, next: Option<Layer>) -> Self {
        Self {
            opts,
            flags: Flags::default(),
            calls: Mutex::new(VecDeque::new()),
            next,
        }
    }

    pub fn label(&self) -> &str {
        self.opts.label()
    }

    pub fn query_was_called(&self) -> bool {
        self.was_called(Operation::Query)
    }

    pub fn query_row_was_called(&self) -> bool {
        self.was_called(Operation::QueryRow)
    }

    pub fn exec_was_called(&self) -> bool {
        self.was_called(Operation::Exec)
    }

    pub fn prepare_was_called(&self) -> bool {
        self.was_called(Operation::Prepare)
    }

    pub fn begin_was_called(&self) -> bool {
        self.was_called(Operation::Begin)
    }

    fn was_called(&self, operation: Operation) -> bool {
        self.flags
            .get(operation)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Calls seen so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.iter().cloned().collect()
    }

    /// Clear the flags and the call log.
    pub fn reset(&self) {
        for operation in Operation::CHAIN {
            if let Some(flag) = self.flags.get(operation) {
                flag.store(false, Ordering::SeqCst);
            }
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, operation: Operation, sql: Option<&str>, params: &[QueryParam]) {
        if let Some(flag) = self.flags.get(operation) {
            flag.store(true, Ordering::SeqCst);
        }
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if calls.len() == MAX_RECORDED_CALLS {
            calls.pop_front();
        }
        calls.push_back(RecordedCall {
            operation,
            sql: sql.map(str::to_string),
            param_types: param_types(params),
        });
    }

    fn next_for(&self, operation: Operation) -> DbResult<&Layer> {
        self.next.as_ref().ok_or_else(|| {
            DbError::invalid_input(format!(
                "spy '{}' has no stub for {operation} and no next layer",
                self.label()
            ))
        })
    }
}

#[async_trait]
impl Interceptor for SpyInterceptor {
    fn kind(&self) -> InterceptorKind {
        InterceptorKind::Spy
    }

    fn next(&self) -> Option<&Layer> {
        self.next.as_ref()
    }

    fn as_spy(&self) -> Option<&SpyInterceptor> {
        Some(self)
    }

    async fn query(&self, ctx: &CallContext, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        self.record(Operation::Query, Some(sql), params);
        if let Some(rows) = &self.opts.stub_query {
            return Ok(rows.clone());
        }
        self.next_for(Operation::Query)?
            .query(ctx, sql, params)
            .await
    }

    async fn query_row(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>> {
        self.record(Operation::QueryRow, Some(sql), params);
        if let Some(rows) = &self.opts.stub_query {
            return Ok(rows.first().cloned());
        }
        self.next_for(Operation::QueryRow)?
            .query_row(ctx, sql, params)
            .await
    }

    async fn exec(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        self.record(Operation::Exec, Some(sql), params);
        if let Some(result) = self.opts.stub_exec {
            return Ok(result);
        }
        self.next_for(Operation::Exec)?
            .exec(ctx, sql, params)
            .await
    }

    async fn prepare(&self, ctx: &CallContext, sql: &str) -> DbResult<StatementInfo> {
        self.record(Operation::Prepare, Some(sql), &[]);
        if let Some(info) = &self.opts.stub_prepare {
            return Ok(StatementInfo {
                sql: sql.to_string(),
                ..info.clone()
            });
        }
        self.next_for(Operation::Prepare)?.prepare(ctx, sql).await
    }

    async fn begin(&self, ctx: &CallContext) -> DbResult<Transaction> {
        self.record(Operation::Begin, None, &[]);
        self.next_for(Operation::Begin)?.begin(ctx).await
    }
}
