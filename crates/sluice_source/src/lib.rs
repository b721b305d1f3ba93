//! Schema discovery and streaming extraction for SQL-speaking tabular stores.
//!
//! The pipeline is transport-agnostic: a [`Connector`] opens sessions and
//! cursors, and the components here drive it.
//!
//! - [`mapper::map`]: native type tag to [`ColumnType`]
//! - [`ConnectionManager`]: scoped session acquisition and `check`, with
//!   [`AsyncSession`] for sessions held by async code
//! - [`discover`]: concurrent per-table column introspection
//! - [`normalize()`]: raw row to [`RecordEnvelope`]
//! - [`read`]: lazy, sequential extraction with close-on-drop
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_source::{read, ConfiguredSelection, ConnectionConfig, ConnectionManager};
//! use sluice_source::postgres::PostgresConnector;
//! use std::sync::Arc;
//!
//! let config = ConnectionConfig::from_json_str(&raw)?;
//! let manager = ConnectionManager::new(Arc::new(PostgresConnector::new()));
//! let selection = ConfiguredSelection::new().with_table("users", ["id", "name"]);
//!
//! for record in read(manager.acquire(&config)?, selection) {
//!     println!("{:?}", record?);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod discover;
pub mod error;
pub mod extract;
pub mod mapper;
pub mod normalize;
pub mod sql;
pub mod transport;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use config::{ConnectionConfig, Secret, SslMode};
pub use connection::{AsyncSession, ConnectionManager, ScopedCursor, SessionGuard};
pub use discover::{describe_table, discover};
pub use error::{Result, SourceError, TransportError};
pub use extract::{read, Extraction};
pub use normalize::normalize;
pub use sql::AnsiDialect;
pub use transport::{Connector, Cursor, Dialect, RawRow, Session, TransportResult};
pub use types::{
    Catalog, ColumnDescriptor, ColumnSchema, ColumnType, ConfiguredSelection, ConfiguredTable,
    NormalizedType, RawValue, RecordEnvelope, TableSchema, SUPPORTED_SYNC_MODES,
};
