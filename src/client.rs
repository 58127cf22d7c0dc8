//! The multi-database client.
//!
//! A [`Client`] owns one pool and one interceptor chain per configured
//! database, plus the stats sampler. It is normally used as a process-wide
//! singleton through [`Client::get_or_init`]; [`Client::new`] builds an
//! independent instance.

use crate::config::ConfigSource;
use crate::db::{DbPool, DriverOptions, PoolStats, WaitStats};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{DbError, DbResult};
use crate::handle::Handle;
use crate::interceptor::{
    self, CallContext, ChainContext, DriverAdapter, InterceptorFactory, Layer,
};
use crate::sink::MetricsSink;
use crate::stats::{DEFAULT_SAMPLING_INTERVAL, PoolProbe, StatsSampler, StatsSnapshot};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to build a [`Client`].
#[derive(Clone)]
pub struct ClientOptions {
    descriptors: Vec<ConnectionDescriptor>,
    factories: Vec<InterceptorFactory>,
    sampling_interval: Duration,
    driver: DriverOptions,
    config: Option<Arc<dyn ConfigSource>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    shutdown_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            descriptors: Vec::new(),
            factories: Vec::new(),
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            driver: DriverOptions::default(),
            config: None,
            metrics: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of databases.
    pub fn with_connection_descriptors(
        mut self,
        descriptors: impl IntoIterator<Item = ConnectionDescriptor>,
    ) -> Self {
        self.descriptors = descriptors.into_iter().collect();
        self
    }

    pub fn with_descriptor(mut self, descriptor: ConnectionDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Replace the interceptor factories. The first one becomes the
    /// outermost layer of every chain.
    pub fn with_interceptor_factories(
        mut self,
        factories: impl IntoIterator<Item = InterceptorFactory>,
    ) -> Self {
        self.factories = factories.into_iter().collect();
        self
    }

    /// Append a factory; it wraps closer to the driver than those before it.
    pub fn with_interceptor(mut self, factory: InterceptorFactory) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    pub fn with_driver_config(mut self, driver: DriverOptions) -> Self {
        self.driver = driver;
        self
    }

    /// Source for runtime switches such as `debug`.
    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = Some(config);
        self
    }

    /// Where gauges and durations go. Defaults to the `metrics` facade when
    /// that feature is enabled, otherwise nowhere.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Bound on each pool close during [`Client::close`].
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn descriptors(&self) -> &[ConnectionDescriptor] {
        &self.descriptors
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.sampling_interval.is_zero() {
            return Err(DbError::configuration("sampling interval must be greater than 0"));
        }
        let mut seen = HashSet::new();
        for descriptor in &self.descriptors {
            descriptor.validate()?;
            if !seen.insert(descriptor.name()) {
                return Err(DbError::configuration(format!(
                    "Duplicate database name: {}",
                    descriptor.name()
                )));
            }
        }
        Ok(())
    }

    fn metrics_sink(&self) -> Arc<dyn MetricsSink> {
        if let Some(sink) = &self.metrics {
            return sink.clone();
        }
        #[cfg(feature = "metrics")]
        {
            Arc::new(crate::sink::MetricsFacade)
        }
        #[cfg(not(feature = "metrics"))]
        {
            Arc::new(crate::sink::NoopSink)
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.descriptors.iter().map(|d| d.name()).collect();
        f.debug_struct("ClientOptions")
            .field("databases", &names)
            .field("factories", &self.factories)
            .field("sampling_interval", &self.sampling_interval)
            .field("driver", &self.driver)
            .field("has_config", &self.config.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

/// One configured database: its pool, wait counters and chain head.
struct ManagedConnection {
    descriptor: ConnectionDescriptor,
    pool: DbPool,
    waits: Arc<WaitStats>,
    head: Layer,
}

impl PoolProbe for ManagedConnection {
    fn db_name(&self) -> &str {
        self.descriptor.name()
    }

    fn pool_stats(&self) -> DbResult<PoolStats> {
        if self.pool.is_closed() {
            return Err(DbError::shutdown(self.descriptor.name(), "pool is closed"));
        }
        Ok(self.pool.stats(&self.waits))
    }
}

type GlobalSlot = Arc<OnceCell<Arc<Client>>>;

static GLOBAL: LazyLock<RwLock<GlobalSlot>> = LazyLock::new(Default::default);

pub struct Client {
    connections: HashMap<String, Arc<ManagedConnection>>,
    /// Names in configuration order
    order: Vec<String>,
    sampler: StatsSampler,
    closed: AtomicBool,
    shutdown_timeout: Duration,
    debug: bool,
}

impl Client {
    /// Return the process-wide client, building it from `options` on first
    /// use.
    ///
    /// Later calls return the existing instance and ignore `options`.
    /// Concurrent first calls build the client once. A failed build leaves
    /// nothing behind, so a later call can try again.
    pub async fn get_or_init(options: ClientOptions) -> DbResult<Arc<Client>> {
        let slot = GLOBAL
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let has_descriptors = !options.descriptors.is_empty();
        let built_here = AtomicBool::new(false);
        let built_flag = &built_here;

        let client = slot
            .get_or_try_init(move || async move {
                built_flag.store(true, Ordering::SeqCst);
                Client::new(options).await.map(Arc::new)
            })
            .await?;

        if !built_here.load(Ordering::SeqCst) && has_descriptors {
            warn!("Client already initialized; ignoring the new options");
        }
        Ok(client.clone())
    }

    /// The process-wide client, if one has been built.
    pub fn global() -> Option<Arc<Client>> {
        GLOBAL
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get()
            .cloned()
    }

    /// Forget the process-wide client so the next `get_or_init` builds a new
    /// one. Returns the previous instance, which is not closed.
    pub fn reset_for_tests() -> Option<Arc<Client>> {
        let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
        let previous = slot.get().cloned();
        *slot = Arc::default();
        previous
    }

    /// Build an independent client. Every pool is opened before this returns.
    ///
    /// If any pool fails to open, the ones already opened are closed and the
    /// error is returned.
    pub async fn new(options: ClientOptions) -> DbResult<Self> {
        options.validate()?;

        let debug_sql = options
            .config
            .as_ref()
            .is_some_and(|config| config.get_bool("debug"));
        let metrics = options.metrics_sink();

        let mut connections: HashMap<String, Arc<ManagedConnection>> =
            HashMap::with_capacity(options.descriptors.len());
        let mut order = Vec::with_capacity(options.descriptors.len());
        for descriptor in &options.descriptors {
            let pool = match DbPool::open(descriptor, &options.driver).await {
                Ok(pool) => pool,
                Err(e) => {
                    error!(db = %descriptor.name(), error = %e, "Failed to open pool");
                    for opened in connections.values() {
                        opened.pool.close().await;
                    }
                    return Err(e);
                }
            };

            let name = descriptor.name().to_string();
            let waits = Arc::new(WaitStats::default());
            let terminal: Layer = Arc::new(DriverAdapter::new(
                name.clone(),
                pool.clone(),
                waits.clone(),
                options.driver.default_timeout,
            ));
            let chain_ctx = ChainContext {
                name: name.clone(),
                debug: debug_sql,
                metrics: metrics.clone(),
            };
            let head = interceptor::build_chain(&options.factories, &chain_ctx, terminal);

            order.push(name.clone());
            connections.insert(
                name,
                Arc::new(ManagedConnection {
                    descriptor: descriptor.clone(),
                    pool,
                    waits,
                    head,
                }),
            );
        }

        let probes: Vec<Arc<dyn PoolProbe>> = order
            .iter()
            .filter_map(|name| connections.get(name))
            .map(|conn| Arc::clone(conn) as Arc<dyn PoolProbe>)
            .collect();
        let sampler = StatsSampler::start(probes, metrics, options.sampling_interval);

        info!(
            databases = ?order,
            interceptors = options.factories.len(),
            debug = debug_sql,
            "Client ready"
        );

        Ok(Self {
            connections,
            order,
            sampler,
            closed: AtomicBool::new(false),
            shutdown_timeout: options.shutdown_timeout,
            debug: debug_sql,
        })
    }

    /// Handle for the database registered as `name`, bound to `ctx`.
    ///
    /// Fails with [`DbError::NotFound`] for names that were never
    /// configured.
    pub fn get_connection(&self, ctx: &CallContext, name: &str) -> DbResult<Handle> {
        let conn = self
            .connections
            .get(name)
            .ok_or_else(|| DbError::not_found(name))?;
        Ok(Handle::new(name, conn.head.clone(), ctx.clone()))
    }

    /// Names of all databases, in configuration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ConnectionDescriptor> {
        self.connections.get(name).map(|conn| &conn.descriptor)
    }

    /// Current pool statistics for one database.
    pub fn stats(&self, name: &str) -> DbResult<PoolStats> {
        self.connections
            .get(name)
            .ok_or_else(|| DbError::not_found(name))?
            .pool_stats()
    }

    /// Current statistics of every open pool, as published by the sampler.
    pub fn snapshot(&self) -> Vec<StatsSnapshot> {
        self.order
            .iter()
            .filter_map(|name| self.connections.get(name))
            .filter_map(|conn| {
                conn.pool_stats()
                    .ok()
                    .map(|stats| StatsSnapshot::from_stats(conn.db_name(), &stats))
            })
            .flatten()
            .collect()
    }

    /// Whether SQL text logging is on.
    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the sampler, then close every pool.
    ///
    /// Every pool is closed even if an earlier step failed; the first error
    /// is returned. Each pool close waits for its checked-out connections,
    /// bounded by the shutdown timeout. Closing twice is a no-op.
    pub async fn close(&self) -> DbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing client");

        let mut first_err: Option<DbError> = None;
        if let Err(e) = self.sampler.stop().await {
            error!(error = %e, "Stats sampler did not stop cleanly");
            first_err.get_or_insert(e);
        }

        for name in &self.order {
            let Some(conn) = self.connections.get(name) else {
                continue;
            };
            match tokio::time::timeout(self.shutdown_timeout, conn.pool.close()).await {
                Ok(()) => info!(db = %name, "Pool closed"),
                Err(_) => {
                    let e = DbError::shutdown(
                        name,
                        format!(
                            "pool did not close within {}ms",
                            self.shutdown_timeout.as_millis()
                        ),
                    );
                    error!(db = %name, error = %e, "Pool close timed out");
                    first_err.get_or_insert(e);
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("databases", &self.order)
            .field("closed", &self.is_closed())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}
