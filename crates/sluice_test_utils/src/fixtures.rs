//! Canned stores and configs shared by tests.

use chrono::NaiveDate;
use sluice_source::{ConnectionConfig, RawValue};

use crate::fake::{FakeConnector, FakeStoreBuilder, FakeTable};

pub const TEST_PASSWORD: &str = "s3cret";

/// Config accepted by every fixture store.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("fake-host", "warehouse", "reader", TEST_PASSWORD)
}

/// `users(id int not null, name varchar nullable)` with rows `(1, "a")`, `(2, NULL)`.
pub fn users_table() -> FakeTable {
    FakeTable::new("users")
        .column("id", "int", false)
        .column("name", "varchar(64)", true)
        .row(vec![RawValue::Integer(1), RawValue::from("a")])
        .row(vec![RawValue::Integer(2), RawValue::Null])
}

/// `orders(id bigint, amount numeric(10,2), created_at timestamp)`, three rows.
pub fn orders_table() -> FakeTable {
    let created = |day: u32| {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .map(RawValue::Timestamp)
            .unwrap_or(RawValue::Null)
    };
    FakeTable::new("orders")
        .column("id", "bigint", false)
        .column("amount", "numeric(10,2)", true)
        .column("created_at", "timestamp", true)
        .row(vec![RawValue::Integer(10), RawValue::Float(9.5), created(1)])
        .row(vec![RawValue::Integer(11), RawValue::Float(20.0), created(2)])
        .row(vec![RawValue::Integer(12), RawValue::Null, RawValue::Null])
}

/// Builder preloaded with `users` and `orders`, guarded by [`TEST_PASSWORD`].
pub fn users_and_orders() -> FakeStoreBuilder {
    FakeConnector::builder()
        .table(users_table())
        .table(orders_table())
        .require_password(TEST_PASSWORD)
}
