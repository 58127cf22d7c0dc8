//! The process-wide client.
//!
//! One test only: every test in this binary would share the global slot.

use dbhub::{CallContext, Client, ClientOptions, ConnectionDescriptor, NoopSink};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_get_or_init_returns_one_instance() {
    let _ = Client::reset_for_tests();
    assert!(Client::global().is_none());

    // a failed build leaves the slot empty
    let bad = ClientOptions::new()
        .with_descriptor(ConnectionDescriptor::new("bad", "sqlite:/nonexistent/dir/x.db").unwrap())
        .with_metrics_sink(Arc::new(NoopSink));
    assert!(Client::get_or_init(bad).await.is_err());
    assert!(Client::global().is_none());

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("single.db");
    let options = ClientOptions::new()
        .with_descriptor(
            ConnectionDescriptor::new("single", format!("sqlite:{}?mode=rwc", path.display()))
                .unwrap(),
        )
        .with_metrics_sink(Arc::new(NoopSink));

    let (a, b) = tokio::join!(
        Client::get_or_init(options.clone()),
        Client::get_or_init(options.clone())
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    // later options are ignored
    let other = ClientOptions::new()
        .with_descriptor(ConnectionDescriptor::new("other", "sqlite::memory:").unwrap());
    let c = Client::get_or_init(other).await.unwrap();
    assert!(Arc::ptr_eq(&a, &c));
    assert!(!c.contains("other"));

    let global = Client::global().unwrap();
    assert!(Arc::ptr_eq(&a, &global));
    assert!(
        global
            .get_connection(&CallContext::background(), "single")
            .is_ok()
    );

    let previous = Client::reset_for_tests().unwrap();
    assert!(Arc::ptr_eq(&a, &previous));
    assert!(Client::global().is_none());
    previous.close().await.unwrap();
}
