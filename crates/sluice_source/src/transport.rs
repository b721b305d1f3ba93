//! Transport traits: the seam between the pipeline and a concrete store.
//!
//! A [`Connector`] opens [`Session`]s; a session opens [`Cursor`]s. All calls
//! are blocking. Handles must be closed explicitly or dropped; implementations
//! release the underlying resource in either case, exactly once.

use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::sql::{quote_ident, quote_ident_path};
use crate::types::RawValue;

/// Result alias for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// A raw row as returned by a cursor.
pub type RawRow = Vec<RawValue>;

/// Opens sessions against a store.
pub trait Connector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Metadata queries and quoting rules of this store.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Open an authenticated session. Blocks until the handshake completes,
    /// fails, or exceeds `config.connect_timeout()`.
    fn connect(&self, config: &ConnectionConfig) -> TransportResult<Box<dyn Session>>;
}

/// A live, authenticated session.
pub trait Session: Send {
    /// Open a cursor on this session.
    fn cursor(&mut self) -> TransportResult<Box<dyn Cursor>>;

    /// Release the session. Calling twice is a no-op.
    fn close(&mut self) -> TransportResult<()>;
}

/// A forward-only row iterator over one query.
pub trait Cursor: Send {
    /// Run a statement. Rows become available through [`Cursor::fetch_one`].
    fn execute(&mut self, sql: &str) -> TransportResult<()>;

    /// Next row, or `None` once the result is exhausted.
    fn fetch_one(&mut self) -> TransportResult<Option<RawRow>>;

    /// Drain the remaining rows.
    fn fetch_all(&mut self) -> TransportResult<Vec<RawRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Release the cursor. Calling twice is a no-op.
    fn close(&mut self) -> TransportResult<()>;
}

/// Store-specific SQL for metadata and identifiers.
pub trait Dialect: Send + Sync {
    /// Query returning one row per table: `(table_name)`.
    fn list_tables_sql(&self, namespace: Option<&str>) -> String;

    /// Query returning one row per column, in declaration order:
    /// `(table_name, column_name, native_type, nullable)`.
    fn describe_columns_sql(&self, namespace: Option<&str>, table: &str) -> String;

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    /// Fully qualified table reference. Without a namespace, dotted names are
    /// quoted per segment.
    fn qualified_table(&self, namespace: Option<&str>, table: &str) -> String {
        match namespace {
            Some(ns) => format!("{}.{}", self.quote_identifier(ns), self.quote_identifier(table)),
            None => quote_ident_path(table),
        }
    }
}
