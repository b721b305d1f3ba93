//! Session handling from async code.
//!
//! `RuntimeBound` wraps the fake so every transport call drives a private
//! runtime, the way the PostgreSQL transport does. Any such call made from an
//! async task panics, so these tests fail if a session is ever touched off the
//! blocking pool.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sluice_source::{
    discover, read, ConfiguredSelection, ConnectionConfig, ConnectionManager, Connector, Cursor,
    Dialect, RawRow, RawValue, Session, SourceError, TransportResult,
};
use sluice_test_utils::{fixtures, FakeConnector};
use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap()
        })
        .block_on(future)
}

struct RuntimeBound(FakeConnector);

impl Connector for RuntimeBound {
    fn name(&self) -> &str {
        "runtime-bound"
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.0.dialect()
    }

    fn connect(&self, config: &ConnectionConfig) -> TransportResult<Box<dyn Session>> {
        block_on(async {});
        let session = self.0.connect(config)?;
        Ok(Box::new(BoundSession(session)))
    }
}

struct BoundSession(Box<dyn Session>);

impl Session for BoundSession {
    fn cursor(&mut self) -> TransportResult<Box<dyn Cursor>> {
        block_on(async {});
        Ok(Box::new(BoundCursor(self.0.cursor()?)))
    }

    fn close(&mut self) -> TransportResult<()> {
        block_on(async {});
        self.0.close()
    }
}

struct BoundCursor(Box<dyn Cursor>);

impl Cursor for BoundCursor {
    fn execute(&mut self, sql: &str) -> TransportResult<()> {
        block_on(async {});
        self.0.execute(sql)
    }

    fn fetch_one(&mut self) -> TransportResult<Option<RawRow>> {
        block_on(async {});
        self.0.fetch_one()
    }

    fn close(&mut self) -> TransportResult<()> {
        block_on(async {});
        self.0.close()
    }
}

fn bound_manager(fake: &FakeConnector) -> ConnectionManager {
    ConnectionManager::new(Arc::new(RuntimeBound(fake.clone())))
}

/// Closes handed to the blocking pool finish shortly after the drop.
async fn wait_until_released(fake: &FakeConnector) {
    for _ in 0..200 {
        if fake.stats().all_released() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "handles still open: {} sessions, {} cursors",
        fake.stats().open_sessions(),
        fake.stats().open_cursors()
    );
}

#[tokio::test]
async fn test_async_session_queries_and_releases() {
    let fake = fixtures::users_and_orders().build();
    let manager = bound_manager(&fake);

    let mut session = manager
        .acquire_concurrent(&fixtures::test_config())
        .await
        .unwrap();
    let rows = session.query_all("SELECT 1").await.unwrap();
    assert_eq!(rows, vec![vec![RawValue::Integer(1)]]);
    session.release().await.unwrap();

    let stats = fake.stats();
    assert_eq!(stats.sessions_opened(), 1);
    assert_eq!(stats.sessions_closed(), 1);
    assert!(stats.all_released());
}

#[tokio::test]
async fn test_dropping_async_session_inside_a_task_closes_it() {
    let fake = fixtures::users_and_orders().build();
    let manager = bound_manager(&fake);

    let mut session = manager
        .acquire_concurrent(&fixtures::test_config())
        .await
        .unwrap();
    session.query_all("SHOW TABLES").await.unwrap();
    drop(session);

    wait_until_released(&fake).await;
    assert_eq!(fake.stats().sessions_closed(), 1);
}

#[tokio::test]
async fn test_async_session_closes_after_panicking_work() {
    let fake = fixtures::users_and_orders().build();
    let manager = bound_manager(&fake);

    let mut session = manager
        .acquire_concurrent(&fixtures::test_config())
        .await
        .unwrap();
    let err = session
        .run(|_| -> sluice_source::Result<()> { panic!("describe blew up") })
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Internal(_)));

    assert!(session.query_all("SELECT 1").await.is_err());
    assert!(fake.stats().all_released());
}

#[tokio::test]
async fn test_async_acquire_reports_bad_credentials() {
    let fake = fixtures::users_and_orders().build();
    let mut config = fixtures::test_config();
    config.password = sluice_source::Secret::new("wrong");

    let err = bound_manager(&fake)
        .acquire_concurrent(&config)
        .await
        .unwrap_err();
    assert!(err.is_config_error());
    assert_eq!(fake.stats().sessions_opened(), 0);
}

#[tokio::test]
async fn test_discover_keeps_sessions_on_the_blocking_pool() {
    let fake = fixtures::users_and_orders().build();
    let catalog = discover(&bound_manager(&fake), &fixtures::test_config())
        .await
        .unwrap();

    assert_eq!(catalog.len(), 2);
    assert_eq!(fake.stats().sessions_opened(), 3);
    assert!(fake.stats().all_released());
}

#[tokio::test]
async fn test_oversized_concurrency_fails_discovery_cleanly() {
    let fake = fixtures::users_and_orders().build();
    let mut config = fixtures::test_config();
    config.max_concurrency = usize::MAX;

    let err = discover(&bound_manager(&fake), &config).await.unwrap_err();
    assert!(matches!(err, SourceError::Config(_)));
    assert_eq!(fake.stats().connect_attempts(), 0);
}

#[test]
fn test_read_runs_on_a_plain_thread() {
    let fake = fixtures::users_and_orders().build();
    let session = bound_manager(&fake)
        .acquire(&fixtures::test_config())
        .unwrap();
    let count = read(session, ConfiguredSelection::new().with_table("users", ["id"])).count();

    assert_eq!(count, 2);
    assert!(fake.stats().all_released());
}
