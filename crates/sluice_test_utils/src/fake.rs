//! In-memory transport that records every handle it hands out.
//!
//! The fake speaks a tiny SQL subset: `SELECT 1`, `SHOW TABLES`,
//! `SHOW COLUMNS "t"` and `SELECT "a", "b" FROM "t"`. Failures can be
//! injected per table to exercise error paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sluice_source::sql::quote_ident;
use sluice_source::{
    ConnectionConfig, Connector, Cursor, Dialect, RawRow, RawValue, Session, TransportError,
    TransportResult,
};

// ============================================================================
// Store definition
// ============================================================================

/// A column of a fake table.
#[derive(Debug, Clone)]
pub struct FakeColumn {
    pub name: String,
    pub native_type: String,
    pub nullable: bool,
}

/// A fake table: ordered columns plus rows.
#[derive(Debug, Clone)]
pub struct FakeTable {
    pub name: String,
    pub columns: Vec<FakeColumn>,
    pub rows: Vec<RawRow>,
}

impl FakeTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, native_type: &str, nullable: bool) -> Self {
        self.columns.push(FakeColumn {
            name: name.to_string(),
            native_type: native_type.to_string(),
            nullable,
        });
        self
    }

    pub fn row(mut self, values: Vec<RawValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// Append `count` rows produced by `make`.
    pub fn rows_from(mut self, count: usize, make: impl Fn(usize) -> RawRow) -> Self {
        self.rows.extend((0..count).map(make));
        self
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
struct Faults {
    password: Option<String>,
    unreachable: bool,
    connect_delay: Option<Duration>,
    fail_listing: bool,
    fail_describe: HashSet<String>,
    fail_select: HashSet<String>,
    fail_fetch_after: HashMap<String, usize>,
    short_row_after: HashMap<String, usize>,
}

// ============================================================================
// Stats
// ============================================================================

/// Handle counters shared by a connector and everything it opened.
#[derive(Debug, Default)]
pub struct FakeStats {
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    sessions_leaked: AtomicUsize,
    active_sessions: AtomicUsize,
    max_active_sessions: AtomicUsize,
    cursors_opened: AtomicUsize,
    cursors_closed: AtomicUsize,
    cursors_leaked: AtomicUsize,
    max_cursors_per_session: AtomicUsize,
    connect_attempts: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl FakeStats {
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    /// Sessions dropped without an explicit close.
    pub fn sessions_leaked(&self) -> usize {
        self.sessions_leaked.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions_opened() - self.sessions_closed()
    }

    pub fn max_active_sessions(&self) -> usize {
        self.max_active_sessions.load(Ordering::SeqCst)
    }

    pub fn cursors_opened(&self) -> usize {
        self.cursors_opened.load(Ordering::SeqCst)
    }

    pub fn cursors_closed(&self) -> usize {
        self.cursors_closed.load(Ordering::SeqCst)
    }

    /// Cursors dropped without an explicit close.
    pub fn cursors_leaked(&self) -> usize {
        self.cursors_leaked.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> usize {
        self.cursors_opened() - self.cursors_closed()
    }

    /// Most cursors ever open at once on a single session.
    pub fn max_cursors_per_session(&self) -> usize {
        self.max_cursors_per_session.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Every statement executed, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// True when every session and cursor handed out was closed explicitly.
    pub fn all_released(&self) -> bool {
        self.open_sessions() == 0
            && self.open_cursors() == 0
            && self.sessions_leaked() == 0
            && self.cursors_leaked() == 0
    }

    fn record_query(&self, sql: &str) {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sql.to_string());
        }
    }
}

fn raise_max(max: &AtomicUsize, value: usize) {
    max.fetch_max(value, Ordering::SeqCst);
}

// ============================================================================
// Connector
// ============================================================================

/// Builder and connector for an in-memory store.
#[derive(Clone)]
pub struct FakeConnector {
    tables: Arc<Vec<FakeTable>>,
    faults: Arc<Faults>,
    stats: Arc<FakeStats>,
}

/// Builds a [`FakeConnector`].
#[derive(Debug, Default)]
pub struct FakeStoreBuilder {
    tables: Vec<FakeTable>,
    faults: Faults,
}

impl FakeStoreBuilder {
    pub fn table(mut self, table: FakeTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Reject sessions whose password differs from `password`.
    pub fn require_password(mut self, password: &str) -> Self {
        self.faults.password = Some(password.to_string());
        self
    }

    /// Fail every connection attempt.
    pub fn unreachable(mut self) -> Self {
        self.faults.unreachable = true;
        self
    }

    /// Sleep this long inside every handshake. A delay beyond the config's
    /// connect timeout fails the handshake with `Timeout` once the timeout
    /// has elapsed.
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.faults.connect_delay = Some(delay);
        self
    }

    pub fn fail_listing(mut self) -> Self {
        self.faults.fail_listing = true;
        self
    }

    pub fn fail_describe(mut self, table: &str) -> Self {
        self.faults.fail_describe.insert(table.to_string());
        self
    }

    pub fn fail_select(mut self, table: &str) -> Self {
        self.faults.fail_select.insert(table.to_string());
        self
    }

    /// Let `rows` rows of `table` through, then fail the next fetch.
    pub fn fail_fetch_after(mut self, table: &str, rows: usize) -> Self {
        self.faults.fail_fetch_after.insert(table.to_string(), rows);
        self
    }

    /// Deliver `rows` rows of `table` intact, then one row missing its last
    /// value.
    pub fn short_row_after(mut self, table: &str, rows: usize) -> Self {
        self.faults.short_row_after.insert(table.to_string(), rows);
        self
    }

    pub fn build(self) -> FakeConnector {
        FakeConnector {
            tables: Arc::new(self.tables),
            faults: Arc::new(self.faults),
            stats: Arc::new(FakeStats::default()),
        }
    }
}

impl FakeConnector {
    pub fn builder() -> FakeStoreBuilder {
        FakeStoreBuilder::default()
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }
}

impl Connector for FakeConnector {
    fn name(&self) -> &str {
        "fake"
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(FakeDialect)
    }

    fn connect(&self, config: &ConnectionConfig) -> TransportResult<Box<dyn Session>> {
        self.stats.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.faults.connect_delay {
            let timeout = config.connect_timeout();
            if delay > timeout {
                std::thread::sleep(timeout);
                return Err(TransportError::Timeout(timeout));
            }
            std::thread::sleep(delay);
        }
        if self.faults.unreachable {
            return Err(TransportError::Connect(format!(
                "could not reach {}:{}",
                config.host, config.port
            )));
        }
        if let Some(expected) = &self.faults.password {
            if config.password.expose() != expected {
                return Err(TransportError::Auth(format!(
                    "password authentication failed for user \"{}\"",
                    config.username
                )));
            }
        }

        self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        raise_max(&self.stats.max_active_sessions, active);

        Ok(Box::new(FakeSession {
            tables: Arc::clone(&self.tables),
            faults: Arc::clone(&self.faults),
            stats: Arc::clone(&self.stats),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            closed: false,
        }))
    }
}

/// `SHOW TABLES` / `SHOW COLUMNS` metadata queries.
#[derive(Debug, Clone, Copy)]
pub struct FakeDialect;

impl Dialect for FakeDialect {
    fn list_tables_sql(&self, _namespace: Option<&str>) -> String {
        "SHOW TABLES".to_string()
    }

    fn describe_columns_sql(&self, _namespace: Option<&str>, table: &str) -> String {
        format!("SHOW COLUMNS {}", quote_ident(table))
    }
}

// ============================================================================
// Session and cursor
// ============================================================================

struct FakeSession {
    tables: Arc<Vec<FakeTable>>,
    faults: Arc<Faults>,
    stats: Arc<FakeStats>,
    open_cursors: Arc<AtomicUsize>,
    closed: bool,
}

impl Session for FakeSession {
    fn cursor(&mut self) -> TransportResult<Box<dyn Cursor>> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stats.cursors_opened.fetch_add(1, Ordering::SeqCst);
        let open = self.open_cursors.fetch_add(1, Ordering::SeqCst) + 1;
        raise_max(&self.stats.max_cursors_per_session, open);

        Ok(Box::new(FakeCursor {
            tables: Arc::clone(&self.tables),
            faults: Arc::clone(&self.faults),
            stats: Arc::clone(&self.stats),
            session_cursors: Arc::clone(&self.open_cursors),
            rows: VecDeque::new(),
            fail_after: None,
            short_row_at: None,
            delivered: 0,
            executed: false,
            closed: false,
        }))
    }

    fn close(&mut self) -> TransportResult<()> {
        if !self.closed {
            self.closed = true;
            self.stats.sessions_closed.fetch_add(1, Ordering::SeqCst);
            self.stats.active_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if !self.closed {
            self.stats.sessions_leaked.fetch_add(1, Ordering::SeqCst);
            self.stats.active_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct FakeCursor {
    tables: Arc<Vec<FakeTable>>,
    faults: Arc<Faults>,
    stats: Arc<FakeStats>,
    session_cursors: Arc<AtomicUsize>,
    rows: VecDeque<RawRow>,
    fail_after: Option<(String, usize)>,
    short_row_at: Option<usize>,
    delivered: usize,
    executed: bool,
    closed: bool,
}

impl FakeCursor {
    fn table(&self, name: &str) -> TransportResult<&FakeTable> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| TransportError::Query(format!("relation \"{}\" does not exist", name)))
    }

    fn run(&self, statement: Statement) -> TransportResult<(Vec<RawRow>, Option<(String, usize)>)> {
        match statement {
            Statement::SelectOne => Ok((vec![vec![RawValue::Integer(1)]], None)),
            Statement::ShowTables => {
                if self.faults.fail_listing {
                    return Err(TransportError::Query("permission denied for catalog".into()));
                }
                let rows = self
                    .tables
                    .iter()
                    .map(|t| vec![RawValue::Text(t.name.clone())])
                    .collect();
                Ok((rows, None))
            }
            Statement::ShowColumns { table } => {
                if self.faults.fail_describe.contains(&table) {
                    return Err(TransportError::Query(format!(
                        "could not describe \"{}\"",
                        table
                    )));
                }
                let fake = self.table(&table)?;
                let rows = fake
                    .columns
                    .iter()
                    .map(|c| {
                        vec![
                            RawValue::Text(fake.name.clone()),
                            RawValue::Text(c.name.clone()),
                            RawValue::Text(c.native_type.clone()),
                            RawValue::Boolean(c.nullable),
                        ]
                    })
                    .collect();
                Ok((rows, None))
            }
            Statement::Select { columns, table } => {
                if self.faults.fail_select.contains(&table) {
                    return Err(TransportError::Query(format!(
                        "permission denied for table {}",
                        table
                    )));
                }
                let fake = self.table(&table)?;
                let indexes = columns
                    .iter()
                    .map(|c| {
                        fake.column_index(c).ok_or_else(|| {
                            TransportError::Query(format!("column \"{}\" does not exist", c))
                        })
                    })
                    .collect::<TransportResult<Vec<_>>>()?;
                let rows = fake
                    .rows
                    .iter()
                    .map(|row| {
                        indexes
                            .iter()
                            .map(|&i| row.get(i).cloned().unwrap_or(RawValue::Null))
                            .collect()
                    })
                    .collect();
                let fail_after = self
                    .faults
                    .fail_fetch_after
                    .get(&table)
                    .map(|&n| (table.clone(), n));
                Ok((rows, fail_after))
            }
        }
    }
}

impl Cursor for FakeCursor {
    fn execute(&mut self, sql: &str) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stats.record_query(sql);
        let statement = parse_statement(sql)?;
        let short_row_at = match &statement {
            Statement::Select { table, .. } => self.faults.short_row_after.get(table).copied(),
            _ => None,
        };
        let (rows, fail_after) = self.run(statement)?;
        self.rows = rows.into();
        self.fail_after = fail_after;
        self.short_row_at = short_row_at;
        self.delivered = 0;
        self.executed = true;
        Ok(())
    }

    fn fetch_one(&mut self) -> TransportResult<Option<RawRow>> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.executed {
            return Err(TransportError::Query("no statement executed".into()));
        }
        if let Some((table, limit)) = &self.fail_after {
            if self.delivered >= *limit {
                return Err(TransportError::Query(format!(
                    "connection reset while reading {}",
                    table
                )));
            }
        }
        let mut row = self.rows.pop_front();
        if let Some(values) = row.as_mut() {
            if self.short_row_at == Some(self.delivered) {
                values.pop();
            }
            self.delivered += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> TransportResult<()> {
        if !self.closed {
            self.closed = true;
            self.rows.clear();
            self.stats.cursors_closed.fetch_add(1, Ordering::SeqCst);
            self.session_cursors.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeCursor {
    fn drop(&mut self) {
        if !self.closed {
            self.stats.cursors_leaked.fetch_add(1, Ordering::SeqCst);
            self.session_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Statement parsing
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Statement {
    SelectOne,
    ShowTables,
    ShowColumns { table: String },
    Select { columns: Vec<String>, table: String },
}

fn syntax_error(sql: &str) -> TransportError {
    TransportError::Query(format!("syntax error in \"{}\"", sql))
}

fn parse_statement(sql: &str) -> TransportResult<Statement> {
    let trimmed = sql.trim();
    if trimmed.eq_ignore_ascii_case("SELECT 1") {
        return Ok(Statement::SelectOne);
    }
    if trimmed.eq_ignore_ascii_case("SHOW TABLES") {
        return Ok(Statement::ShowTables);
    }
    if let Some(rest) = trimmed.strip_prefix("SHOW COLUMNS ") {
        let mut tokens = Tokens::new(rest);
        let table = tokens.qualified_name().ok_or_else(|| syntax_error(sql))?;
        return if tokens.at_end() {
            Ok(Statement::ShowColumns { table })
        } else {
            Err(syntax_error(sql))
        };
    }
    if let Some(rest) = trimmed.strip_prefix("SELECT ") {
        let mut tokens = Tokens::new(rest);
        let mut columns = Vec::new();
        loop {
            columns.push(tokens.quoted().ok_or_else(|| syntax_error(sql))?);
            if !tokens.eat(",") {
                break;
            }
        }
        if !tokens.eat("FROM") {
            return Err(syntax_error(sql));
        }
        let table = tokens.qualified_name().ok_or_else(|| syntax_error(sql))?;
        if !tokens.at_end() {
            return Err(syntax_error(sql));
        }
        return Ok(Statement::Select { columns, table });
    }
    Err(syntax_error(sql))
}

/// Cursor over a statement tail, aware of quoted identifiers.
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.rest.is_empty()
    }

    fn eat(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix(keyword) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    /// A `"double ""quoted"""` identifier.
    fn quoted(&mut self) -> Option<String> {
        self.skip_ws();
        let input: &'a str = self.rest;
        let mut chars = input.char_indices();
        if chars.next()?.1 != '"' {
            return None;
        }
        let mut ident = String::new();
        while let Some((i, ch)) = chars.next() {
            if ch != '"' {
                ident.push(ch);
                continue;
            }
            if input[i + 1..].starts_with('"') {
                ident.push('"');
                chars.next();
                continue;
            }
            self.rest = &input[i + 1..];
            return Some(ident);
        }
        None
    }

    /// `"a"` or `"ns"."a"`; only the last segment is kept.
    fn qualified_name(&mut self) -> Option<String> {
        let mut name = self.quoted()?;
        while self.rest.starts_with('.') {
            self.rest = &self.rest[1..];
            name = self.quoted()?;
        }
        Some(name)
    }
}
