//! Metric sinks.
//!
//! The client never talks to a metrics backend directly. Gauges from the stats
//! sampler and durations from the instrumentation layer go through
//! [`MetricsSink`], which has three built-in implementations:
//! - [`GaugeRegistry`]: keeps the latest values in memory and renders them in
//!   the Prometheus text exposition format.
//! - [`MetricsFacade`]: forwards to the `metrics` crate (feature `metrics`).
//! - [`NoopSink`]: drops everything.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Destination for gauges and operation durations.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);

    fn record_duration(&self, _name: &str, _labels: &[(&str, &str)], _elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn set_gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

type SeriesKey = (String, Vec<(String, String)>);

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

#[derive(Debug, Clone, Copy, Default)]
struct DurationSummary {
    count: u64,
    sum: Duration,
}

/// In-memory sink holding the latest value of every series.
#[derive(Debug, Default)]
pub struct GaugeRegistry {
    gauges: RwLock<BTreeMap<SeriesKey, f64>>,
    durations: RwLock<BTreeMap<SeriesKey, DurationSummary>>,
}

impl GaugeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of a gauge; label order does not matter.
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        gauges.get(&series_key(name, labels)).copied()
    }

    /// Number of gauge series.
    pub fn len(&self) -> usize {
        self.gauges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many durations were recorded for a series.
    pub fn duration_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let durations = self.durations.read().unwrap_or_else(PoisonError::into_inner);
        durations
            .get(&series_key(name, labels))
            .map_or(0, |s| s.count)
    }

    /// Render all series in the Prometheus text exposition format.
    ///
    /// Gauges come out as `gauge`; durations as a `summary` with `_sum` and
    /// `_count` lines, in seconds.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        let mut current: Option<&str> = None;
        for ((name, labels), value) in gauges.iter() {
            if current != Some(name.as_str()) {
                let _ = writeln!(out, "# TYPE {name} gauge");
                current = Some(name.as_str());
            }
            let _ = writeln!(out, "{name}{} {value}", render_labels(labels));
        }
        drop(gauges);

        let durations = self.durations.read().unwrap_or_else(PoisonError::into_inner);
        let mut current: Option<&str> = None;
        for ((name, labels), summary) in durations.iter() {
            if current != Some(name.as_str()) {
                let _ = writeln!(out, "# TYPE {name} summary");
                current = Some(name.as_str());
            }
            let labels = render_labels(labels);
            let _ = writeln!(out, "{name}_sum{labels} {:.6}", summary.sum.as_secs_f64());
            let _ = writeln!(out, "{name}_count{labels} {}", summary.count);
        }

        out
    }
}

fn render_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let inner: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect();
    format!("{{{}}}", inner.join(","))
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl MetricsSink for GaugeRegistry {
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        gauges.insert(series_key(name, labels), value);
    }

    fn record_duration(&self, name: &str, labels: &[(&str, &str)], elapsed: Duration) {
        let mut durations = self.durations.write().unwrap_or_else(PoisonError::into_inner);
        let summary = durations.entry(series_key(name, labels)).or_default();
        summary.count += 1;
        summary.sum += elapsed;
    }
}

/// Forwards to the global `metrics` recorder, if one is installed.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacade;

#[cfg(feature = "metrics")]
impl MetricsFacade {
    fn labels(labels: &[(&str, &str)]) -> Vec<::metrics::Label> {
        labels
            .iter()
            .map(|(k, v)| ::metrics::Label::new(k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(feature = "metrics")]
impl MetricsSink for MetricsFacade {
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        ::metrics::gauge!(name.to_string(), Self::labels(labels)).set(value);
    }

    fn record_duration(&self, name: &str, labels: &[(&str, &str)], elapsed: Duration) {
        ::metrics::histogram!(name.to_string(), Self::labels(labels)).record(elapsed.as_secs_f64());
    }
}
