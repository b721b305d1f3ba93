//! Error types for discovery and extraction.

use std::time::Duration;
use thiserror::Error;

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised by a transport (session or cursor level).
///
/// These carry no table context; the component that issued the call wraps
/// them into a [`SourceError`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint unreachable or handshake rejected
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Credentials rejected by the store
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Handshake did not complete in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Statement or fetch failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Handle used after release
    #[error("Handle already closed")]
    Closed,
}

/// Connector errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Cannot establish or authenticate a session
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Metadata enumeration failed
    #[error("Discovery failed{}: {message}", table_suffix(.table))]
    Discovery {
        table: Option<String>,
        message: String,
    },

    /// Query or fetch failed while streaming
    #[error("Extraction failed for table '{table}': {message}")]
    Extraction { table: String, message: String },

    /// Invariant violation inside the connector
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid connection configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SourceError {
    /// Wrap a transport failure raised while opening a session.
    pub fn connectivity(err: TransportError) -> Self {
        Self::Connectivity(err.to_string())
    }

    /// Discovery failure scoped to one table.
    pub fn discovery(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Discovery {
            table: Some(table.into()),
            message: message.to_string(),
        }
    }

    /// Discovery failure while listing tables.
    pub fn listing(message: impl ToString) -> Self {
        Self::Discovery {
            table: None,
            message: message.to_string(),
        }
    }

    /// Extraction failure scoped to one table.
    pub fn extraction(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Extraction {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Internal errors signal a bug, never a condition the caller can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// True when the user's configuration (credentials, endpoint, settings) is at fault.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Connectivity(_))
    }
}

fn table_suffix(table: &Option<String>) -> String {
    match table {
        Some(name) => format!(" for table '{}'", name),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_message_includes_table() {
        let err = SourceError::discovery("orders", "relation does not exist");
        assert_eq!(
            err.to_string(),
            "Discovery failed for table 'orders': relation does not exist"
        );
    }

    #[test]
    fn test_listing_message_has_no_table() {
        let err = SourceError::listing(TransportError::Closed);
        assert_eq!(err.to_string(), "Discovery failed: Handle already closed");
    }

    #[test]
    fn test_connectivity_wraps_transport_text() {
        let err = SourceError::connectivity(TransportError::Auth("bad password".into()));
        assert_eq!(
            err.to_string(),
            "Connectivity error: Authentication failed: bad password"
        );
        assert!(err.is_config_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_only_internal_is_fatal() {
        assert!(SourceError::internal("mismatch").is_fatal());
        assert!(!SourceError::extraction("t", "boom").is_fatal());
        assert!(!SourceError::config("x").is_fatal());
    }
}
