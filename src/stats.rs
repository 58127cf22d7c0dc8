//! Periodic pool statistics sampling.
//!
//! A single background task reads every connection's [`PoolStats`] on a fixed
//! interval and publishes them as `dbhub_pool_stats{db, stats}` gauges.
//! Ticks run one after another inside that task, so a slow tick delays the
//! next one instead of overlapping it; missed ticks are skipped.

use crate::db::PoolStats;
use crate::error::{DbError, DbResult};
use crate::sink::MetricsSink;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Gauge every pool statistic is published under.
pub const POOL_STATS_METRIC: &str = "dbhub_pool_stats";

pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsMetric {
    MaxOpen,
    Open,
    Idle,
    InUse,
    WaitCount,
    WaitDuration,
}

impl StatsMetric {
    pub const ALL: [StatsMetric; 6] = [
        StatsMetric::MaxOpen,
        StatsMetric::Open,
        StatsMetric::Idle,
        StatsMetric::InUse,
        StatsMetric::WaitCount,
        StatsMetric::WaitDuration,
    ];

    /// Value of the `stats` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxOpen => "max_open",
            Self::Open => "open",
            Self::Idle => "idle",
            Self::InUse => "in_use",
            Self::WaitCount => "wait_count",
            Self::WaitDuration => "wait_duration",
        }
    }

    /// Read this metric from a stats sample. Wait duration is in seconds.
    pub fn value(&self, stats: &PoolStats) -> f64 {
        match self {
            Self::MaxOpen => stats.max_open.into(),
            Self::Open => stats.open.into(),
            Self::Idle => stats.idle.into(),
            Self::InUse => stats.in_use.into(),
            Self::WaitCount => stats.wait_count as f64,
            Self::WaitDuration => stats.wait_duration.as_secs_f64(),
        }
    }
}

impl fmt::Display for StatsMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published value. Recomputed on every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub db_name: String,
    pub metric: StatsMetric,
    pub value: f64,
}

impl StatsSnapshot {
    /// All metrics of one sample, in [`StatsMetric::ALL`] order.
    pub fn from_stats(db_name: &str, stats: &PoolStats) -> Vec<Self> {
        StatsMetric::ALL
            .iter()
            .map(|metric| Self {
                db_name: db_name.to_string(),
                metric: *metric,
                value: metric.value(stats),
            })
            .collect()
    }
}

/// Something the sampler can read pool statistics from.
pub trait PoolProbe: Send + Sync {
    fn db_name(&self) -> &str;

    /// Fails once the pool is closed.
    fn pool_stats(&self) -> DbResult<PoolStats>;
}

/// Sample every probe once and publish the gauges.
///
/// Probes that fail are logged and skipped; the others are still published.
/// Returns what was published.
pub fn sample_once(probes: &[Arc<dyn PoolProbe>], sink: &dyn MetricsSink) -> Vec<StatsSnapshot> {
    let mut published = Vec::with_capacity(probes.len() * StatsMetric::ALL.len());
    for probe in probes {
        let stats = match probe.pool_stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(db = %probe.db_name(), error = %e, "Skipping pool stats");
                continue;
            }
        };
        for snapshot in StatsSnapshot::from_stats(probe.db_name(), &stats) {
            sink.set_gauge(
                POOL_STATS_METRIC,
                &[("db", snapshot.db_name.as_str()), ("stats", snapshot.metric.as_str())],
                snapshot.value,
            );
            published.push(snapshot);
        }
    }
    published
}

/// Owned handle to the background sampling task.
#[derive(Debug)]
pub struct StatsSampler {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StatsSampler {
    /// Spawn the sampling task. The first sample is taken immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        probes: Vec<Arc<dyn PoolProbe>>,
        sink: Arc<dyn MetricsSink>,
        interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                connections = probes.len(),
                "Stats sampler started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        sample_once(&probes, sink.as_ref());
                    }
                }
            }
            debug!("Stats sampler stopped");
        });

        Self {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for it to finish. Later calls are no-ops.
    pub async fn stop(&self) -> DbResult<()> {
        self.token.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        handle.await.map_err(|e| {
            DbError::shutdown("stats-sampler", format!("sampler task failed: {e}"))
        })?;
        info!("Stats sampler joined");
        Ok(())
    }
}

impl Drop for StatsSampler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::GaugeRegistry;

    struct FixedProbe {
        name: String,
        stats: Option<PoolStats>,
    }

    impl PoolProbe for FixedProbe {
        fn db_name(&self) -> &str {
            &self.name
        }

        fn pool_stats(&self) -> DbResult<PoolStats> {
            self.stats
                .ok_or_else(|| DbError::shutdown(&self.name, "pool is closed"))
        }
    }

    fn probe(name: &str, stats: Option<PoolStats>) -> Arc<dyn PoolProbe> {
        Arc::new(FixedProbe {
            name: name.to_string(),
            stats,
        })
    }

    fn sample_stats() -> PoolStats {
        PoolStats {
            max_open: 10,
            open: 3,
            idle: 1,
            in_use: 2,
            wait_count: 4,
            wait_duration: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_snapshot_values() {
        let snapshots = StatsSnapshot::from_stats("a", &sample_stats());
        let values: Vec<_> = snapshots.iter().map(|s| (s.metric.as_str(), s.value)).collect();
        assert_eq!(
            values,
            vec![
                ("max_open", 10.0),
                ("open", 3.0),
                ("idle", 1.0),
                ("in_use", 2.0),
                ("wait_count", 4.0),
                ("wait_duration", 0.25),
            ]
        );
    }

    #[test]
    fn test_failing_probe_is_skipped() {
        let registry = GaugeRegistry::new();
        let probes = vec![probe("closed", None), probe("live", Some(sample_stats()))];

        let published = sample_once(&probes, &registry);
        assert_eq!(published.len(), StatsMetric::ALL.len());
        assert!(published.iter().all(|s| s.db_name == "live"));
        assert_eq!(
            registry.get(POOL_STATS_METRIC, &[("db", "live"), ("stats", "max_open")]),
            Some(10.0)
        );
        assert_eq!(
            registry.get(POOL_STATS_METRIC, &[("db", "closed"), ("stats", "max_open")]),
            None
        );
    }

    #[tokio::test]
    async fn test_sampler_publishes_and_stops() {
        let registry = Arc::new(GaugeRegistry::new());
        let sampler = StatsSampler::start(
            vec![probe("a", Some(sample_stats()))],
            registry.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sampler.is_running());
        assert_eq!(
            registry.get(POOL_STATS_METRIC, &[("db", "a"), ("stats", "in_use")]),
            Some(2.0)
        );

        sampler.stop().await.unwrap();
        assert!(!sampler.is_running());
        // second stop is a no-op
        sampler.stop().await.unwrap();
    }
}
