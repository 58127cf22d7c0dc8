//! Interceptor chains.
//!
//! Every connection owns a singly linked chain of [`Interceptor`] layers. The
//! head is what a [`Handle`](crate::handle::Handle) calls into; each layer
//! either does work around a call to its `next` layer or answers the call
//! itself. The tail is always the [`DriverAdapter`], which issues the real
//! sqlx call.
//!
//! Chains are built once per connection from a list of
//! [`InterceptorFactory`] values. The first factory becomes the outermost
//! layer. Chains are never shared between connections and never change after
//! construction.

pub mod context;
pub mod driver;
pub mod instrument;
pub mod spy;

use crate::db::{ExecResult, QueryParam, Row, Rows, StatementInfo, Transaction};
use crate::error::DbResult;
use crate::sink::MetricsSink;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use context::{CallContext, CancelReason};
pub use driver::DriverAdapter;
pub use instrument::{InstrumentationInterceptor, InstrumentationOptions};
pub use spy::{RecordedCall, SpyInterceptor, SpyOptions};

/// Kind of database operation, used in errors, logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    QueryRow,
    Exec,
    Prepare,
    Begin,
    Commit,
    Rollback,
}

impl Operation {
    /// Operations that travel through the interceptor chain.
    pub const CHAIN: [Operation; 5] = [
        Operation::Query,
        Operation::QueryRow,
        Operation::Exec,
        Operation::Prepare,
        Operation::Begin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::QueryRow => "query_row",
            Self::Exec => "exec",
            Self::Prepare => "prepare",
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag identifying what a layer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorKind {
    Instrumentation,
    Spy,
    Custom,
    Driver,
}

impl fmt::Display for InterceptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Instrumentation => "instrumentation",
            Self::Spy => "spy",
            Self::Custom => "custom",
            Self::Driver => "driver",
        };
        f.write_str(s)
    }
}

/// One layer of a connection's chain.
///
/// Implementations must return errors from `next` unchanged.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn kind(&self) -> InterceptorKind;

    /// The next layer, `None` only for the terminal driver.
    fn next(&self) -> Option<&Layer>;

    fn as_spy(&self) -> Option<&SpyInterceptor> {
        None
    }

    async fn query(&self, ctx: &CallContext, sql: &str, params: &[QueryParam]) -> DbResult<Rows>;

    async fn query_row(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>>;

    async fn exec(&self, ctx: &CallContext, sql: &str, params: &[QueryParam])
    -> DbResult<ExecResult>;

    async fn prepare(&self, ctx: &CallContext, sql: &str) -> DbResult<StatementInfo>;

    async fn begin(&self, ctx: &CallContext) -> DbResult<Transaction>;
}

/// A shared reference to a chain layer.
pub type Layer = Arc<dyn Interceptor>;

/// What a factory knows about the connection its layer is built for.
#[derive(Clone)]
pub struct ChainContext {
    pub name: String,
    /// Log SQL text and parameter shapes
    pub debug: bool,
    pub metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainContext")
            .field("name", &self.name)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

type CustomFactory = dyn Fn(&ChainContext, Layer) -> Layer + Send + Sync;

/// Builds one layer of a chain around the layer that follows it.
#[derive(Clone)]
pub enum InterceptorFactory {
    Instrumentation(InstrumentationOptions),
    Spy(SpyOptions),
    Custom(Arc<CustomFactory>),
}

impl InterceptorFactory {
    /// Wrap a closure that builds a user-defined layer.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ChainContext, Layer) -> Layer + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn build(&self, ctx: &ChainContext, next: Layer) -> Layer {
        match self {
            Self::Instrumentation(opts) => Arc::new(InstrumentationInterceptor::new(
                ctx.name.clone(),
                opts.clone(),
                ctx.debug,
                ctx.metrics.clone(),
                next,
            )),
            Self::Spy(opts) => Arc::new(SpyInterceptor::new(opts.clone(), next)),
            Self::Custom(f) => f(ctx, next),
        }
    }
}

impl fmt::Debug for InterceptorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instrumentation(opts) => f.debug_tuple("Instrumentation").field(opts).finish(),
            Self::Spy(opts) => f.debug_tuple("Spy").field(opts).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Fold factories around `terminal`; the first factory ends up outermost.
pub fn build_chain(factories: &[InterceptorFactory], ctx: &ChainContext, terminal: Layer) -> Layer {
    factories
        .iter()
        .rev()
        .fold(terminal, |next, factory| factory.build(ctx, next))
}

/// Kinds of every layer from head to tail.
pub fn layers(head: &Layer) -> Vec<InterceptorKind> {
    let mut kinds = Vec::new();
    let mut current = Some(head);
    while let Some(layer) = current {
        kinds.push(layer.kind());
        current = layer.next();
    }
    kinds
}

/// The first spy in the chain carrying `label`.
pub fn find_spy<'a>(head: &'a Layer, label: &str) -> Option<&'a SpyInterceptor> {
    let mut current = Some(head);
    while let Some(layer) = current {
        if let Some(spy) = layer.as_spy().filter(|s| s.label() == label) {
            return Some(spy);
        }
        current = layer.next();
    }
    None
}
