//! PostgreSQL transport over `sqlx`.
//!
//! Sessions are single connections. Cursors are server-side (`DECLARE ...
//! CURSOR` inside a read-only transaction) and fetched in batches of
//! `fetch_size` rows, so a table is never materialized client-side.
//!
//! Statements go through the simple query protocol; every value arrives in
//! text form and is decoded by its column type name.

use std::collections::VecDeque;
use std::future::Future;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, debug_span, warn};

use crate::config::{ConnectionConfig, SslMode};
use crate::error::TransportError;
use crate::sql::{hash_sql, quote_ident, sql_op_name, AnsiDialect};
use crate::transport::{Connector, Cursor, Dialect, RawRow, Session, TransportResult};
use crate::types::RawValue;

const APPLICATION_NAME: &str = "sluice";

/// SQLSTATE codes for rejected credentials.
const AUTH_FAILURE_CODES: &[&str] = &["28P01", "28000"];

// ============================================================================
// Runtime
// ============================================================================

static RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();

/// Drive a future to completion on the transport's own runtime.
///
/// Must not be called from inside an async task; blocking-pool threads and
/// plain threads are fine.
fn block_on<F: Future>(future: F) -> TransportResult<F::Output> {
    let runtime = RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sluice-pg")
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
    });
    match runtime {
        Ok(rt) => Ok(rt.block_on(future)),
        Err(e) => Err(TransportError::Connect(format!(
            "failed to start transport runtime: {}",
            e
        ))),
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens PostgreSQL sessions.
#[derive(Debug, Clone, Default)]
pub struct PostgresConnector {
    dialect: Arc<AnsiDialect>,
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
        let ssl_mode = match config.ssl_mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        };
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .ssl_mode(ssl_mode)
            .application_name(APPLICATION_NAME);
        if !config.password.is_empty() {
            options = options.password(config.password.expose());
        }
        options
    }
}

impl Connector for PostgresConnector {
    fn name(&self) -> &str {
        "postgres"
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    fn connect(&self, config: &ConnectionConfig) -> TransportResult<Box<dyn Session>> {
        let options = Self::connect_options(config);
        let timeout = config.connect_timeout();

        let conn = block_on(async move {
            tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await
        })?
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(connect_error)?;

        Ok(Box::new(PgSession {
            shared: Arc::new(Shared {
                conn: Mutex::new(Some(conn)),
                cursor_active: AtomicBool::new(false),
                next_cursor: AtomicU64::new(0),
            }),
            fetch_size: config.fetch_size,
        }))
    }
}

fn connect_error(err: sqlx::Error) -> TransportError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            if AUTH_FAILURE_CODES.contains(&code.as_ref()) {
                return TransportError::Auth(db.message().to_string());
            }
        }
    }
    TransportError::Connect(err.to_string())
}

fn query_error(err: sqlx::Error) -> TransportError {
    TransportError::Query(err.to_string())
}

// ============================================================================
// Session
// ============================================================================

struct Shared {
    conn: Mutex<Option<PgConnection>>,
    cursor_active: AtomicBool,
    next_cursor: AtomicU64,
}

impl Shared {
    fn lock(&self) -> TransportResult<MutexGuard<'_, Option<PgConnection>>> {
        self.conn
            .lock()
            .map_err(|_| TransportError::Query("connection lock poisoned".to_string()))
    }

    /// Run one or more statements, discarding any rows.
    fn execute(&self, sql: &str) -> TransportResult<()> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(TransportError::Closed)?;
        traced(sql, || {
            block_on(async { sqlx::raw_sql(sql).execute(&mut *conn).await })?
                .map(|_| ())
                .map_err(query_error)
        })
    }

    fn fetch(&self, sql: &str) -> TransportResult<Vec<PgRow>> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(TransportError::Closed)?;
        traced(sql, || {
            block_on(async { sqlx::raw_sql(sql).fetch_all(&mut *conn).await })?
                .map_err(query_error)
        })
    }
}

fn traced<T>(sql: &str, run: impl FnOnce() -> TransportResult<T>) -> TransportResult<T> {
    let span = debug_span!(
        "db.query",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    let result = run();
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    result
}

struct PgSession {
    shared: Arc<Shared>,
    fetch_size: usize,
}

impl Session for PgSession {
    fn cursor(&mut self) -> TransportResult<Box<dyn Cursor>> {
        if self
            .shared
            .cursor_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::Query(
                "another cursor is still open on this session".to_string(),
            ));
        }
        let id = self.shared.next_cursor.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(PgCursor {
            shared: Arc::clone(&self.shared),
            name: format!("sluice_cursor_{}", id),
            fetch_size: self.fetch_size,
            buffer: VecDeque::new(),
            state: CursorState::Idle,
        }))
    }

    fn close(&mut self) -> TransportResult<()> {
        let conn = self.shared.lock()?.take();
        match conn {
            Some(conn) => {
                debug!("Closing PostgreSQL session");
                block_on(conn.close())?.map_err(query_error)
            }
            None => Ok(()),
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close PostgreSQL session");
        }
    }
}

// ============================================================================
// Cursor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// No statement yet
    Idle,
    /// Declared; more rows may follow
    Open,
    /// Declared; the last fetch came back short
    Drained,
    /// A statement failed; the transaction is aborted
    Failed,
    Closed,
}

struct PgCursor {
    shared: Arc<Shared>,
    name: String,
    fetch_size: usize,
    buffer: VecDeque<RawRow>,
    state: CursorState,
}

impl PgCursor {
    fn refill(&mut self) -> TransportResult<()> {
        let sql = format!(
            "FETCH FORWARD {} FROM {}",
            self.fetch_size,
            quote_ident(&self.name)
        );
        let rows = match self.shared.fetch(&sql) {
            Ok(rows) => rows,
            Err(e) => {
                self.state = CursorState::Failed;
                return Err(e);
            }
        };
        if rows.len() < self.fetch_size {
            self.state = CursorState::Drained;
        }
        for row in &rows {
            self.buffer.push_back(decode_row(row)?);
        }
        Ok(())
    }
}

impl Cursor for PgCursor {
    fn execute(&mut self, sql: &str) -> TransportResult<()> {
        if self.state != CursorState::Idle {
            return Err(TransportError::Query(
                "cursor already executed a statement".to_string(),
            ));
        }
        self.shared.execute("BEGIN READ ONLY")?;
        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            quote_ident(&self.name),
            sql
        );
        if let Err(e) = self.shared.execute(&declare) {
            self.state = CursorState::Failed;
            return Err(e);
        }
        self.state = CursorState::Open;
        Ok(())
    }

    fn fetch_one(&mut self) -> TransportResult<Option<RawRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            match self.state {
                CursorState::Open => self.refill()?,
                CursorState::Drained => return Ok(None),
                CursorState::Idle => {
                    return Err(TransportError::Query("no statement executed".to_string()))
                }
                CursorState::Failed | CursorState::Closed => return Err(TransportError::Closed),
            }
        }
    }

    fn close(&mut self) -> TransportResult<()> {
        let previous = std::mem::replace(&mut self.state, CursorState::Closed);
        self.buffer.clear();
        let result = match previous {
            CursorState::Open | CursorState::Drained => self.shared.execute(&format!(
                "CLOSE {}; COMMIT",
                quote_ident(&self.name)
            )),
            CursorState::Failed => self.shared.execute("ROLLBACK"),
            CursorState::Idle | CursorState::Closed => Ok(()),
        };
        if previous != CursorState::Closed {
            self.shared.cursor_active.store(false, Ordering::Release);
        }
        match result {
            // Session already gone; nothing left to release.
            Err(TransportError::Closed) => Ok(()),
            other => other,
        }
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(cursor = %self.name, error = %e, "Failed to close cursor");
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_row(row: &PgRow) -> TransportResult<RawRow> {
    (0..row.len())
        .map(|i| {
            let value = row.try_get_raw(i).map_err(query_error)?;
            if value.is_null() {
                return Ok(RawValue::Null);
            }
            let type_name = value.type_info().name().to_string();
            let text = value.as_str().map_err(|e| {
                TransportError::Query(format!("column {} is not valid text: {}", i, e))
            })?;
            Ok(parse_text(&type_name, text))
        })
        .collect()
}

/// Decode a text-format value by its type name. Anything that does not parse
/// is passed through as text.
pub(crate) fn parse_text(type_name: &str, text: &str) -> RawValue {
    let upper = type_name.to_ascii_uppercase();
    if let Some(element) = upper.strip_suffix("[]") {
        return parse_array(element, text).unwrap_or_else(|| RawValue::Text(text.to_string()));
    }
    if let Some(element) = upper.strip_prefix('_') {
        return parse_array(element, text).unwrap_or_else(|| RawValue::Text(text.to_string()));
    }

    let parsed = match upper.as_str() {
        "BOOL" => match text {
            "t" | "true" => Some(RawValue::Boolean(true)),
            "f" | "false" => Some(RawValue::Boolean(false)),
            _ => None,
        },
        "INT2" | "INT4" | "INT8" | "OID" => text.parse::<i64>().ok().map(RawValue::Integer),
        "FLOAT4" | "FLOAT8" => text.parse::<f64>().ok().map(RawValue::Float),
        "NUMERIC" => Some(RawValue::Decimal(text.to_string())),
        "BYTEA" => decode_bytea(text).map(RawValue::Bytes),
        "DATE" => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(RawValue::Date),
        "TIMESTAMP" => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(RawValue::Timestamp),
        "TIMESTAMPTZ" => DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .ok()
            .map(RawValue::TimestampTz),
        "JSON" | "JSONB" => serde_json::from_str(text).ok().map(RawValue::Json),
        _ => None,
    };
    parsed.unwrap_or_else(|| RawValue::Text(text.to_string()))
}

/// `\x` hex output format.
fn decode_bytea(text: &str) -> Option<Vec<u8>> {
    let hex = text.strip_prefix("\\x")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Parse an array literal such as `{1,NULL,"a b"}` or `{{1,2},{3,4}}`.
fn parse_array(element: &str, text: &str) -> Option<RawValue> {
    // Arrays with non-default bounds carry a `[lo:hi]=` prefix
    let body = if text.starts_with('[') {
        &text[text.find('=')? + 1..]
    } else {
        text
    };
    let mut chars = body.chars().peekable();
    let value = parse_array_level(element, &mut chars)?;
    if chars.next().is_some() {
        return None;
    }
    Some(value)
}

fn parse_array_level(element: &str, chars: &mut Peekable<Chars<'_>>) -> Option<RawValue> {
    if chars.next()? != '{' {
        return None;
    }
    let mut items = Vec::new();
    if chars.peek() == Some(&'}') {
        chars.next();
        return Some(RawValue::Array(items));
    }
    loop {
        match *chars.peek()? {
            '{' => items.push(parse_array_level(element, chars)?),
            '"' => {
                chars.next();
                let mut item = String::new();
                loop {
                    match chars.next()? {
                        '\\' => item.push(chars.next()?),
                        '"' => break,
                        c => item.push(c),
                    }
                }
                items.push(parse_text(element, &item));
            }
            _ => {
                let mut item = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' || c == '}' {
                        break;
                    }
                    item.push(c);
                    chars.next();
                }
                let item = item.trim();
                if item.eq_ignore_ascii_case("NULL") {
                    items.push(RawValue::Null);
                } else {
                    items.push(parse_text(element, item));
                }
            }
        }
        match chars.next()? {
            ',' => continue,
            '}' => return Some(RawValue::Array(items)),
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map;
    use crate::normalize::to_json;
    use crate::types::NormalizedType;
    use serde_json::json;

    #[test]
    fn test_scalar_decoding() {
        assert_eq!(parse_text("BOOL", "t"), RawValue::Boolean(true));
        assert_eq!(parse_text("INT8", "-42"), RawValue::Integer(-42));
        assert_eq!(parse_text("FLOAT8", "10.25"), RawValue::Float(10.25));
        assert_eq!(parse_text("TEXT", "hello"), RawValue::Text("hello".into()));
        assert_eq!(
            parse_text("JSONB", r#"{"a": 1}"#),
            RawValue::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_numeric_is_exact() {
        let raw = parse_text("NUMERIC", "12345678901234567890.12345");
        assert_eq!(raw, RawValue::Decimal("12345678901234567890.12345".into()));
        assert_eq!(to_json(raw).to_string(), "12345678901234567890.12345");
        assert_eq!(
            parse_text("_NUMERIC", "{1.10,NULL}"),
            RawValue::Array(vec![RawValue::Decimal("1.10".into()), RawValue::Null])
        );
    }

    #[test]
    fn test_decoded_values_match_advertised_types() {
        // (information_schema name, wire type name, text value)
        let cases = [
            ("money", "MONEY", "$1,000.00"),
            ("hstore", "HSTORE", r#""a"=>"1""#),
            ("record", "RECORD", "(1,x)"),
            ("numeric", "NUMERIC", "1000.00"),
            ("double precision", "FLOAT8", "2.5"),
            ("jsonb", "JSONB", r#"{"a": 1}"#),
        ];
        for (native, wire, text) in cases {
            let value = to_json(parse_text(wire, text));
            let expected = map(native, false).ty;
            let matches = match expected {
                NormalizedType::String => value.is_string(),
                NormalizedType::Float => value.is_number(),
                NormalizedType::Object => value.is_object(),
                _ => false,
            };
            assert!(matches, "{native}: {expected:?} advertised, decoded {value}");
        }
    }

    #[test]
    fn test_temporal_decoding() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_text("DATE", "2024-03-01"), RawValue::Date(date));
        assert_eq!(
            parse_text("TIMESTAMP", "2024-03-01 10:00:00.5"),
            RawValue::Timestamp(date.and_hms_milli_opt(10, 0, 0, 500).unwrap())
        );
        match parse_text("TIMESTAMPTZ", "2024-03-01 10:00:00+02") {
            RawValue::TimestampTz(ts) => assert_eq!(ts.offset().local_minus_utc(), 7200),
            other => panic!("unexpected {:?}", other),
        }
        // Out-of-range sentinels pass through as text
        assert_eq!(parse_text("DATE", "infinity"), RawValue::Text("infinity".into()));
    }

    #[test]
    fn test_bytea_hex() {
        assert_eq!(
            parse_text("BYTEA", "\\xdeadbeef"),
            RawValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(parse_text("BYTEA", "\\xabc"), RawValue::Text("\\xabc".into()));
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(
            parse_text("INT4[]", "{1,NULL,3}"),
            RawValue::Array(vec![
                RawValue::Integer(1),
                RawValue::Null,
                RawValue::Integer(3)
            ])
        );
        assert_eq!(
            parse_text("TEXT[]", r#"{"a b","q\"uote",plain}"#),
            RawValue::Array(vec![
                RawValue::Text("a b".into()),
                RawValue::Text("q\"uote".into()),
                RawValue::Text("plain".into())
            ])
        );
        assert_eq!(
            parse_text("_INT8", "{{1,2},{3,4}}"),
            RawValue::Array(vec![
                RawValue::Array(vec![RawValue::Integer(1), RawValue::Integer(2)]),
                RawValue::Array(vec![RawValue::Integer(3), RawValue::Integer(4)]),
            ])
        );
        assert_eq!(parse_text("INT4[]", "{}"), RawValue::Array(vec![]));
        assert_eq!(
            parse_text("INT4[]", "[0:1]={5,6}"),
            RawValue::Array(vec![RawValue::Integer(5), RawValue::Integer(6)])
        );
    }

    #[test]
    fn test_malformed_array_falls_back_to_text() {
        assert_eq!(parse_text("INT4[]", "{1,2"), RawValue::Text("{1,2".into()));
    }
}
