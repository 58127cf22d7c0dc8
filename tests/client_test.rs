//! Integration tests for client construction, lookup and shutdown.

use dbhub::{
    CallContext, Client, ClientOptions, ConnectionDescriptor, DbError, NoopSink, Operation,
    QueryParam,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sqlite_descriptor(dir: &TempDir, name: &str) -> ConnectionDescriptor {
    let path = dir.path().join(format!("{name}.db"));
    ConnectionDescriptor::new(name, format!("sqlite:{}?mode=rwc", path.display())).unwrap()
}

fn options(descriptors: Vec<ConnectionDescriptor>) -> ClientOptions {
    ClientOptions::new()
        .with_connection_descriptors(descriptors)
        .with_metrics_sink(Arc::new(NoopSink))
}

#[tokio::test]
async fn test_lookup_registered_and_unregistered() {
    let dir = TempDir::new().unwrap();
    let client = Client::new(options(vec![sqlite_descriptor(&dir, "test_1")]))
        .await
        .unwrap();
    let ctx = CallContext::background();

    let handle = client.get_connection(&ctx, "test_1").unwrap();
    assert_eq!(handle.name(), "test_1");
    assert!(client.contains("test_1"));
    assert_eq!(client.descriptor("test_1").unwrap().max_open(), 10);

    let err = client.get_connection(&ctx, "test_3").unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, DbError::NotFound { ref name } if name == "test_3"));
    assert!(!client.contains("test_3"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_two_databases_end_to_end() {
    let dir = TempDir::new().unwrap();
    let client = Client::new(options(vec![
        sqlite_descriptor(&dir, "test_1"),
        sqlite_descriptor(&dir, "test_2"),
    ]))
    .await
    .unwrap();
    let ctx = CallContext::background();
    assert_eq!(client.names(), vec!["test_1", "test_2"]);

    let db1 = client.get_connection(&ctx, "test_1").unwrap();
    let db2 = client.get_connection(&ctx, "test_2").unwrap();

    db1.exec(
        "CREATE TABLE test (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL DEFAULT '')",
        &[],
    )
    .await
    .unwrap();
    db2.exec(
        "CREATE TABLE user (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL DEFAULT '')",
        &[],
    )
    .await
    .unwrap();

    let inserted = db1
        .exec("INSERT INTO test (title) VALUES (?)", &["test".into()])
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 1);
    assert_eq!(inserted.last_insert_id, Some(1));
    db2.exec("INSERT INTO user (username) VALUES (?)", &["u".into()])
        .await
        .unwrap();

    let test_row = db1.first("test", "id").await.unwrap().unwrap();
    assert_eq!(test_row["id"], 1);
    assert_eq!(test_row["title"], "test");

    let user_row = db2.first("user", "id").await.unwrap().unwrap();
    assert_eq!(user_row["id"], 1);
    assert_eq!(user_row["username"], "u");

    // the databases are independent
    let err = db1.query("SELECT * FROM user", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        DbError::Operation {
            operation: Operation::Query,
            ..
        }
    ));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_construction_failure_reports_connection_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no_such_dir").join("x.db");
    let result = Client::new(options(vec![
        sqlite_descriptor(&dir, "good"),
        ConnectionDescriptor::new("bad", format!("sqlite:{}", missing.display())).unwrap(),
    ]))
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, DbError::Connection { ref name, .. } if name == "bad"));
    assert!(err.suggestion().is_some());
}

#[tokio::test]
async fn test_close_with_inflight_operation() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(
        Client::new(options(vec![sqlite_descriptor(&dir, "busy")]))
            .await
            .unwrap(),
    );
    let handle = client
        .get_connection(&CallContext::background(), "busy")
        .unwrap();

    let inflight = tokio::spawn(async move {
        handle
            .query(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 300000) \
                 SELECT count(*) AS n FROM c",
                &[],
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.close().await.unwrap();
    assert!(client.is_closed());

    // the in-flight call either finished or saw the pool go away; it never hangs
    match inflight.await.unwrap() {
        Ok(rows) => assert_eq!(rows.first().unwrap()["n"], 300000),
        Err(e) => assert!(e.is_pool_closed(), "unexpected error: {e}"),
    }

    let late = client
        .get_connection(&CallContext::background(), "busy")
        .unwrap()
        .exec("SELECT 1", &[])
        .await
        .unwrap_err();
    assert!(late.is_pool_closed());

    // closing again is a no-op
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_context_is_not_issued() {
    let dir = TempDir::new().unwrap();
    let client = Client::new(options(vec![sqlite_descriptor(&dir, "ctx")]))
        .await
        .unwrap();

    let ctx = CallContext::background();
    ctx.cancel();
    let err = client
        .get_connection(&ctx, "ctx")
        .unwrap()
        .exec("CREATE TABLE never (id INTEGER)", &[])
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    // the table was not created
    let rows = client
        .get_connection(&CallContext::background(), "ctx")
        .unwrap()
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[QueryParam::from("never")],
        )
        .await
        .unwrap();
    assert!(rows.is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_timeout_reports_error_and_closes_others() {
    let dir = TempDir::new().unwrap();
    let client = Client::new(
        options(vec![
            sqlite_descriptor(&dir, "held"),
            sqlite_descriptor(&dir, "free"),
        ])
        .with_shutdown_timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    // a transaction keeps a connection checked out past the close timeout
    let tx = client
        .get_connection(&CallContext::background(), "held")
        .unwrap()
        .begin()
        .await
        .unwrap();

    let err = client.close().await.unwrap_err();
    assert!(matches!(err, DbError::Shutdown { ref name, .. } if name == "held"));
    assert!(client.stats("free").is_err());

    drop(tx);
}
