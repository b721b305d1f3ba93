//! End-to-end tests of the PostgreSQL transport.
//!
//! These tests need a running PostgreSQL server (see `postgres.rs` for the
//! environment variables). The transport blocks, so every call that touches
//! it outside `discover` runs on the blocking pool.
//!
//! Run with:
//!   cargo test -p sluice_test_utils --features docker-tests

#![cfg(feature = "docker-tests")]

use std::sync::Arc;

use serde_json::json;
use sluice_source::postgres::PostgresConnector;
use sluice_source::{
    discover, read, ConfiguredSelection, ConnectionManager, NormalizedType, SourceError,
};
use sluice_test_utils::PgTestSchema;

fn manager() -> ConnectionManager {
    ConnectionManager::new(Arc::new(PostgresConnector::new()))
}

async fn seeded_schema() -> PgTestSchema {
    let schema = PgTestSchema::create().await.unwrap();
    schema
        .execute(
            r#"
            CREATE TABLE users (id INT NOT NULL, name VARCHAR(64));
            INSERT INTO users VALUES (1, 'a'), (2, NULL);
            CREATE TABLE "order" ("select" BIGINT, tags TEXT[], payload JSONB, raw BYTEA);
            INSERT INTO "order" VALUES (5, ARRAY['x', 'y z'], '{"k": 1}', '\xcafe');
            "#,
        )
        .await
        .unwrap();
    schema
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_against_live_server() {
    let schema = seeded_schema().await;
    let config = schema.connection_config();
    let status = tokio::task::spawn_blocking(move || manager().check(&config))
        .await
        .unwrap();
    assert!(status.is_success(), "{:?}", status.message);
    schema.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_with_wrong_password() {
    let schema = seeded_schema().await;
    let mut config = schema.connection_config();
    config.password = sluice_source::Secret::new("definitely-wrong");

    let status = tokio::task::spawn_blocking(move || manager().check(&config))
        .await
        .unwrap();
    assert!(!status.is_success());
    assert!(status.message.unwrap().starts_with("An exception occurred"));
    schema.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discover_live_schema() {
    let schema = seeded_schema().await;
    let catalog = discover(&manager(), &schema.connection_config())
        .await
        .unwrap();

    let names: Vec<_> = catalog.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["order", "users"]);

    let users = catalog.table("users").unwrap();
    assert!(!users.column("id").unwrap().column_type.nullable);
    assert!(users.column("name").unwrap().column_type.nullable);

    let order = catalog.table("order").unwrap();
    assert_eq!(
        order.column("tags").unwrap().column_type.ty,
        NormalizedType::Array(Box::new(NormalizedType::String))
    );
    assert_eq!(
        order.column("payload").unwrap().column_type.ty,
        NormalizedType::Object
    );
    schema.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_live_rows() {
    let schema = seeded_schema().await;
    let config = schema.connection_config();
    let selection = ConfiguredSelection::new()
        .with_table("users", ["id", "name"])
        .with_table("order", ["select", "tags", "payload", "raw"]);

    let records = tokio::task::spawn_blocking(move || {
        let session = manager().acquire(&config)?;
        read(session, selection).collect::<Result<Vec<_>, SourceError>>()
    })
    .await
    .unwrap()
    .unwrap();

    let data: Vec<_> = records
        .iter()
        .map(|r| serde_json::Value::Object(r.data.clone()))
        .collect();
    assert_eq!(
        data,
        vec![
            json!({"id": 1, "name": "a"}),
            json!({"id": 2, "name": null}),
            json!({"select": 5, "tags": ["x", "y z"], "payload": {"k": 1}, "raw": "yv4="}),
        ]
    );
    schema.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_in_small_batches() {
    let schema = PgTestSchema::create().await.unwrap();
    schema
        .execute("CREATE TABLE n AS SELECT g AS id FROM generate_series(1, 250) g")
        .await
        .unwrap();
    let mut config = schema.connection_config();
    config.fetch_size = 7;

    let count = tokio::task::spawn_blocking(move || {
        let session = manager().acquire(&config).unwrap();
        read(session, ConfiguredSelection::new().with_table("n", ["id"]))
            .map(Result::unwrap)
            .count()
    })
    .await
    .unwrap();

    assert_eq!(count, 250);
    schema.cleanup().await.unwrap();
}
