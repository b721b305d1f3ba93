//! Streaming extraction against the fake transport.

use std::sync::Arc;

use serde_json::{json, Value};
use sluice_source::{
    discover, read, ConfiguredSelection, ConnectionManager, RawValue, RecordEnvelope, SourceError,
};
use sluice_test_utils::{fixtures, FakeConnector, FakeTable};

fn manager_for(fake: &FakeConnector) -> ConnectionManager {
    ConnectionManager::new(Arc::new(fake.clone()))
}

fn read_all(fake: &FakeConnector, selection: ConfiguredSelection) -> Vec<Result<RecordEnvelope, SourceError>> {
    let session = manager_for(fake).acquire(&fixtures::test_config()).unwrap();
    read(session, selection).collect()
}

fn data(envelope: &RecordEnvelope) -> Value {
    Value::Object(envelope.data.clone())
}

#[test]
fn test_reads_users_in_order_with_nulls() {
    let fake = fixtures::users_and_orders().build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new().with_table("users", ["id", "name"]),
    );

    let records: Vec<_> = records.into_iter().map(Result::unwrap).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].table, "users");
    assert_eq!(data(&records[0]), json!({"id": 1, "name": "a"}));
    assert_eq!(data(&records[1]), json!({"id": 2, "name": null}));

    let stats = fake.stats();
    assert_eq!(stats.queries(), vec![r#"SELECT "id", "name" FROM "users""#]);
    assert!(stats.all_released());
}

#[test]
fn test_tables_are_contiguous_and_in_selection_order() {
    let fake = fixtures::users_and_orders().build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new()
            .with_table("orders", ["id", "created_at"])
            .with_table("users", ["name"]),
    );

    let tables: Vec<_> = records
        .iter()
        .map(|r| r.as_ref().unwrap().table.clone())
        .collect();
    assert_eq!(tables, vec!["orders", "orders", "orders", "users", "users"]);

    let first = records[0].as_ref().unwrap();
    assert_eq!(data(first), json!({"id": 10, "created_at": "2024-01-01T12:00:00"}));

    let stats = fake.stats();
    assert_eq!(stats.cursors_opened(), 2);
    assert_eq!(stats.max_cursors_per_session(), 1);
    assert!(stats.all_released());
}

#[test]
fn test_projection_keeps_requested_column_order() {
    let fake = fixtures::users_and_orders().build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new().with_table("users", ["name", "id"]),
    );

    let record = records[0].as_ref().unwrap();
    let keys: Vec<_> = record.data.keys().cloned().collect();
    assert_eq!(keys, vec!["name", "id"]);
}

#[tokio::test]
async fn test_round_trip_from_discovered_catalog() {
    let fake = fixtures::users_and_orders().build();
    let manager = manager_for(&fake);
    let config = fixtures::test_config();

    let catalog = discover(&manager, &config).await.unwrap();
    let selection = ConfiguredSelection::from_catalog(&catalog);

    let session = manager.acquire(&config).unwrap();
    let records: Vec<_> = read(session, selection).map(Result::unwrap).collect();
    assert_eq!(records.len(), 5);
    for record in &records {
        let table = catalog.table(&record.table).unwrap();
        let keys: Vec<_> = record.data.keys().cloned().collect();
        assert_eq!(keys, table.column_names());
    }
    assert!(fake.stats().all_released());
}

#[test]
fn test_dropping_mid_stream_releases_everything() {
    let fake = fixtures::users_and_orders().build();
    let session = manager_for(&fake)
        .acquire(&fixtures::test_config())
        .unwrap();
    let mut extraction = read(
        session,
        ConfiguredSelection::new().with_table("orders", ["id"]),
    );

    assert!(extraction.next().unwrap().is_ok());
    assert_eq!(fake.stats().open_cursors(), 1);
    drop(extraction);

    let stats = fake.stats();
    assert_eq!(stats.open_cursors(), 0);
    assert_eq!(stats.open_sessions(), 0);
    assert!(stats.all_released());
}

#[test]
fn test_fetch_failure_yields_one_error_then_stops() {
    let fake = fixtures::users_and_orders()
        .fail_fetch_after("orders", 1)
        .build();
    let session = manager_for(&fake)
        .acquire(&fixtures::test_config())
        .unwrap();
    let mut extraction = read(
        session,
        ConfiguredSelection::new()
            .with_table("users", ["id"])
            .with_table("orders", ["id"])
            .with_table("users", ["name"]),
    );

    assert!(extraction.next().unwrap().is_ok());
    assert!(extraction.next().unwrap().is_ok());
    assert_eq!(extraction.next().unwrap().unwrap().table, "orders");

    match extraction.next() {
        Some(Err(SourceError::Extraction { table, message })) => {
            assert_eq!(table, "orders");
            assert!(message.contains("connection reset"), "{message}");
        }
        other => panic!("expected extraction error, got {other:?}"),
    }
    assert!(extraction.next().is_none());
    assert!(extraction.next().is_none());

    // Released before the iterator is dropped
    let stats = fake.stats();
    assert!(stats.all_released());
    assert_eq!(stats.cursors_opened(), 2);
}

#[test]
fn test_malformed_row_fails_fast_and_releases() {
    let fake = fixtures::users_and_orders()
        .short_row_after("orders", 1)
        .build();
    let session = manager_for(&fake)
        .acquire(&fixtures::test_config())
        .unwrap();
    let mut extraction = read(
        session,
        ConfiguredSelection::new()
            .with_table("orders", ["id", "amount"])
            .with_table("users", ["id"]),
    );

    assert!(extraction.next().unwrap().is_ok());
    assert_eq!(fake.stats().open_cursors(), 1);

    match extraction.next() {
        Some(Err(err @ SourceError::Internal(_))) => {
            assert!(err.is_fatal());
            assert!(err.to_string().contains("2 projected columns but row has 1"), "{err}");
        }
        other => panic!("expected internal error, got {other:?}"),
    }
    assert!(extraction.next().is_none());
    assert_eq!(extraction.rows_emitted(), 1);

    let stats = fake.stats();
    assert!(stats.all_released());
    assert_eq!(stats.cursors_opened(), 1);
}

#[test]
fn test_select_failure_skips_remaining_tables() {
    let fake = fixtures::users_and_orders().fail_select("users").build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new()
            .with_table("users", ["id"])
            .with_table("orders", ["id"]),
    );

    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0],
        Err(SourceError::Extraction { table, .. }) if table == "users"
    ));
    assert_eq!(fake.stats().queries().len(), 1);
    assert!(fake.stats().all_released());
}

#[test]
fn test_unknown_table_is_an_extraction_error() {
    let fake = fixtures::users_and_orders().build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new().with_table("ghosts", ["id"]),
    );

    match &records[..] {
        [Err(SourceError::Extraction { table, message })] => {
            assert_eq!(table, "ghosts");
            assert!(message.contains("does not exist"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_reserved_and_quoted_identifiers() {
    let fake = FakeConnector::builder()
        .table(
            FakeTable::new("order")
                .column("select", "int", false)
                .column("we\"ird", "text", true)
                .row(vec![RawValue::Integer(7), RawValue::from("x")]),
        )
        .build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new().with_table("order", ["select", "we\"ird"]),
    );

    assert_eq!(
        data(records[0].as_ref().unwrap()),
        json!({"select": 7, "we\"ird": "x"})
    );
    assert_eq!(
        fake.stats().queries(),
        vec![r#"SELECT "select", "we""ird" FROM "order""#]
    );
}

#[test]
fn test_namespace_qualifies_table() {
    let fake = fixtures::users_and_orders().build();
    let mut config = fixtures::test_config();
    config.schema = Some("sales".to_string());

    let session = manager_for(&fake).acquire(&config).unwrap();
    let count = read(session, ConfiguredSelection::new().with_table("users", ["id"])).count();

    assert_eq!(count, 2);
    assert_eq!(
        fake.stats().queries(),
        vec![r#"SELECT "id" FROM "sales"."users""#]
    );
}

#[test]
fn test_table_without_selected_columns_is_skipped() {
    let fake = fixtures::users_and_orders().build();
    let records = read_all(
        &fake,
        ConfiguredSelection::new()
            .with_table("users", Vec::<String>::new())
            .with_table("orders", ["id"]),
    );

    assert_eq!(records.len(), 3);
    assert_eq!(fake.stats().cursors_opened(), 1);
}

#[test]
fn test_large_table_streams_lazily() {
    let fake = FakeConnector::builder()
        .table(
            FakeTable::new("events")
                .column("id", "bigint", false)
                .rows_from(10_000, |i| vec![RawValue::Integer(i as i64)]),
        )
        .build();
    let session = manager_for(&fake)
        .acquire(&fixtures::test_config())
        .unwrap();
    let mut extraction = read(session, ConfiguredSelection::new().with_table("events", ["id"]));

    let first: Vec<_> = extraction.by_ref().take(3).map(Result::unwrap).collect();
    assert_eq!(data(&first[2]), json!({"id": 2}));
    assert_eq!(extraction.rows_emitted(), 3);
    assert_eq!(extraction.count(), 9_997);
}

#[test]
fn test_empty_selection_releases_session() {
    let fake = fixtures::users_and_orders().build();
    let records = read_all(&fake, ConfiguredSelection::new());

    assert!(records.is_empty());
    assert_eq!(fake.stats().sessions_opened(), 1);
    assert!(fake.stats().all_released());
}
