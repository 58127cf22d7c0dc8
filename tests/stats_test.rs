//! Pool statistics published by the background sampler.

use dbhub::stats::POOL_STATS_METRIC;
use dbhub::{
    CallContext, Client, ClientOptions, ConnectionDescriptor, GaugeRegistry, StatsMetric,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn sampled_client(dir: &TempDir, registry: Arc<GaugeRegistry>) -> Client {
    let path = dir.path().join("stats.db");
    let descriptor =
        ConnectionDescriptor::new("stats", format!("sqlite:{}?mode=rwc", path.display()))
            .unwrap()
            .with_max_open(4)
            .with_max_idle(1);
    Client::new(
        ClientOptions::new()
            .with_descriptor(descriptor)
            .with_sampling_interval(Duration::from_millis(10))
            .with_metrics_sink(registry),
    )
    .await
    .unwrap()
}

fn gauge(registry: &GaugeRegistry, metric: StatsMetric) -> Option<f64> {
    registry.get(
        POOL_STATS_METRIC,
        &[("db", "stats"), ("stats", metric.as_str())],
    )
}

#[tokio::test]
async fn test_sampler_publishes_every_metric() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(GaugeRegistry::new());
    let client = sampled_client(&dir, registry.clone()).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    for metric in StatsMetric::ALL {
        assert!(gauge(&registry, metric).is_some(), "missing {metric}");
    }
    assert_eq!(gauge(&registry, StatsMetric::MaxOpen), Some(4.0));
    let idle = gauge(&registry, StatsMetric::Idle).unwrap();
    assert!((0.0..=4.0).contains(&idle));
    let open = gauge(&registry, StatsMetric::Open).unwrap();
    let in_use = gauge(&registry, StatsMetric::InUse).unwrap();
    assert!(in_use <= open);

    let text = registry.render_prometheus();
    assert!(text.contains("# TYPE dbhub_pool_stats gauge"));
    assert!(text.contains(r#"dbhub_pool_stats{db="stats",stats="max_open"} 4"#));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_tracks_checked_out_connections() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(GaugeRegistry::new());
    let client = sampled_client(&dir, registry.clone()).await;

    let tx = client
        .get_connection(&CallContext::background(), "stats")
        .unwrap()
        .begin()
        .await
        .unwrap();

    let stats = client.stats("stats").unwrap();
    assert_eq!(stats.max_open, 4);
    assert!(stats.in_use >= 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gauge(&registry, StatsMetric::InUse).unwrap() >= 1.0);

    tx.rollback().await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_sampling_stops_after_close() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(GaugeRegistry::new());
    let client = sampled_client(&dir, registry.clone()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    client.close().await.unwrap();
    assert!(client.snapshot().is_empty());

    // no more ticks: values stay where the last sample left them
    let before = registry.render_prometheus();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(before, registry.render_prometheus());
}
