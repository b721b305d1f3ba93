//! Scoped session acquisition.
//!
//! [`SessionGuard`] and [`ScopedCursor`] own their transport handle and close
//! it exactly once: on explicit release or on drop, whichever comes first.
//!
//! Transports block, so async code never touches a [`SessionGuard`] directly.
//! It holds an [`AsyncSession`] instead, which moves the guard onto the
//! blocking pool for every call, including the final close.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use sluice_protocol::ConnectionStatus;
use tokio::runtime::Handle;
use tracing::{debug, debug_span, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, SourceError, TransportError};
use crate::sql::{hash_sql, sql_op_name};
use crate::transport::{Connector, Cursor, Dialect, RawRow, Session, TransportResult};

/// Statement run by `check`.
const CHECK_QUERY: &str = "SELECT 1";

/// Opens sessions through an injected [`Connector`].
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }

    /// Open a session, blocking the calling thread for the handshake.
    pub fn acquire(&self, config: &ConnectionConfig) -> Result<SessionGuard> {
        open_session(self.connector.as_ref(), config)
    }

    /// Open a session on the blocking pool so many handshakes can proceed at once.
    pub async fn acquire_concurrent(&self, config: &ConnectionConfig) -> Result<AsyncSession> {
        let connector = Arc::clone(&self.connector);
        let config = config.clone();
        let guard = tokio::task::spawn_blocking(move || open_session(connector.as_ref(), &config))
            .await
            .map_err(join_error)??;
        Ok(AsyncSession::new(guard))
    }

    /// Acquire a session on the blocking pool, run `work` with it, and release
    /// it before returning. The session never crosses into async code.
    pub async fn with_session<T, F>(&self, config: &ConnectionConfig, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionGuard) -> Result<T> + Send + 'static,
    {
        let connector = Arc::clone(&self.connector);
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = open_session(connector.as_ref(), &config)?;
            let outcome = work(&mut session);
            if let Err(e) = session.release() {
                warn!(error = %e, "Failed to release session");
            }
            outcome
        })
        .await
        .map_err(join_error)?
    }

    /// Verify the config can open a session and run a trivial query.
    ///
    /// Never fails: every error becomes a `FAILED` status with a message.
    pub fn check(&self, config: &ConnectionConfig) -> ConnectionStatus {
        match self.round_trip(config) {
            Ok(()) => {
                debug!(connector = self.connector.name(), "Connection check succeeded");
                ConnectionStatus::succeeded()
            }
            Err(e) => {
                warn!(connector = self.connector.name(), error = %e, "Connection check failed");
                ConnectionStatus::failed(format!("An exception occurred: {}", e))
            }
        }
    }

    fn round_trip(&self, config: &ConnectionConfig) -> Result<()> {
        let mut session = self.acquire(config)?;
        let mut cursor = session.open_cursor().map_err(SourceError::connectivity)?;
        cursor.execute(CHECK_QUERY).map_err(SourceError::connectivity)?;
        cursor.fetch_one().map_err(SourceError::connectivity)?;
        cursor.close().map_err(SourceError::connectivity)?;
        session.release().map_err(SourceError::connectivity)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connector", &self.connector.name())
            .finish()
    }
}

fn join_error(err: tokio::task::JoinError) -> SourceError {
    SourceError::internal(format!("session task failed: {}", err))
}

fn open_session(connector: &dyn Connector, config: &ConnectionConfig) -> Result<SessionGuard> {
    config.validate()?;
    let start = Instant::now();
    let session = connector.connect(config).map_err(SourceError::connectivity)?;
    debug!(
        connector = connector.name(),
        host = %config.host,
        database = %config.database,
        duration_ms = start.elapsed().as_millis() as u64,
        "Session opened"
    );
    Ok(SessionGuard::new(
        session,
        connector.dialect(),
        config.schema.clone(),
    ))
}

// ============================================================================
// Session guard
// ============================================================================

/// Exclusive owner of a live session.
pub struct SessionGuard {
    session: Box<dyn Session>,
    dialect: Arc<dyn Dialect>,
    namespace: Option<String>,
    released: bool,
}

impl SessionGuard {
    pub fn new(
        session: Box<dyn Session>,
        dialect: Arc<dyn Dialect>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            session,
            dialect,
            namespace,
            released: false,
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Namespace (schema) the session reads from, if configured.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn open_cursor(&mut self) -> TransportResult<ScopedCursor> {
        if self.released {
            return Err(TransportError::Closed);
        }
        Ok(ScopedCursor::new(self.session.cursor()?))
    }

    /// Run a query on a fresh cursor and collect every row.
    pub fn query_all(&mut self, sql: &str) -> TransportResult<Vec<RawRow>> {
        let span = debug_span!(
            "db.query",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            rows = tracing::field::Empty,
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut cursor = self.open_cursor()?;
        cursor.execute(sql)?;
        let rows = cursor.fetch_all()?;
        cursor.close()?;

        span.record("rows", rows.len() as u64);
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(rows)
    }

    /// Close the session now instead of on drop.
    pub fn release(mut self) -> TransportResult<()> {
        self.released = true;
        self.session.close()
    }
}

impl Deref for SessionGuard {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.session.close() {
            warn!(error = %e, "Failed to close session on drop");
        }
    }
}

// ============================================================================
// Async session
// ============================================================================

/// A session held by async code.
///
/// Every call runs on the blocking pool. Dropping it inside a runtime hands
/// the close to the blocking pool too; outside one it closes inline.
pub struct AsyncSession {
    guard: Option<SessionGuard>,
}

impl AsyncSession {
    fn new(guard: SessionGuard) -> Self {
        Self { guard: Some(guard) }
    }

    /// Run blocking `work` against the session on the blocking pool.
    ///
    /// If `work` panics the session is closed on the blocking thread and every
    /// later call fails with `Closed`.
    pub async fn run<T, F>(&mut self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionGuard) -> Result<T> + Send + 'static,
    {
        let Some(mut guard) = self.guard.take() else {
            return Err(SourceError::connectivity(TransportError::Closed));
        };
        let (guard, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = work(&mut guard);
            (guard, outcome)
        })
        .await
        .map_err(join_error)?;
        self.guard = Some(guard);
        outcome
    }

    /// Run a query on a fresh cursor and collect every row.
    pub async fn query_all(&mut self, sql: impl Into<String>) -> Result<Vec<RawRow>> {
        let sql = sql.into();
        self.run(move |session| session.query_all(&sql).map_err(SourceError::connectivity))
            .await
    }

    /// Close the session and wait for the close to finish.
    pub async fn release(mut self) -> Result<()> {
        let Some(guard) = self.guard.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || guard.release())
            .await
            .map_err(join_error)?
            .map_err(SourceError::connectivity)
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(guard));
            }
            Err(_) => drop(guard),
        }
    }
}

impl std::fmt::Debug for AsyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSession")
            .field("open", &self.guard.is_some())
            .finish()
    }
}

// ============================================================================
// Cursor guard
// ============================================================================

/// A cursor that closes itself when dropped.
pub struct ScopedCursor {
    cursor: Box<dyn Cursor>,
    closed: bool,
}

impl ScopedCursor {
    pub fn new(cursor: Box<dyn Cursor>) -> Self {
        Self {
            cursor,
            closed: false,
        }
    }

    /// Close the cursor now instead of on drop.
    pub fn close(mut self) -> TransportResult<()> {
        self.closed = true;
        self.cursor.close()
    }
}

impl Deref for ScopedCursor {
    type Target = dyn Cursor;

    fn deref(&self) -> &Self::Target {
        self.cursor.as_ref()
    }
}

impl DerefMut for ScopedCursor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cursor.as_mut()
    }
}

impl Drop for ScopedCursor {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.cursor.close() {
            warn!(error = %e, "Failed to close cursor on drop");
        }
    }
}
