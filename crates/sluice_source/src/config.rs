//! Connection configuration.
//!
//! The config arrives as a JSON document supplied by the caller. It is
//! validated once and then only ever borrowed; nothing here is persisted.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SourceError};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FETCH_SIZE: usize = 1000;
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Upper bound on discovery sessions. Stores cap connections well below this.
pub const MAX_CONCURRENCY_LIMIT: usize = 256;

/// A string that never shows up in logs or debug output.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

/// TLS negotiation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Credentials and endpoint for the remote store.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Secret,
    /// Schema (namespace) to discover; the session's current schema when absent
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub ssl_mode: SslMode,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Rows pulled per cursor round trip
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Sessions opened in parallel during discovery
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_fetch_size() -> usize {
    DEFAULT_FETCH_SIZE
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl ConnectionConfig {
    /// Config with defaults for everything but the endpoint and credentials.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            database: database.into(),
            username: username.into(),
            password: Secret::new(password),
            schema: None,
            ssl_mode: SslMode::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| SourceError::config(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SourceError::config("host must not be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(SourceError::config("database must not be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(SourceError::config("username must not be empty"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(SourceError::config("connect_timeout_secs must be at least 1"));
        }
        if self.fetch_size == 0 {
            return Err(SourceError::config("fetch_size must be at least 1"));
        }
        if self.max_concurrency == 0 {
            return Err(SourceError::config("max_concurrency must be at least 1"));
        }
        if self.max_concurrency > MAX_CONCURRENCY_LIMIT {
            return Err(SourceError::config(format!(
                "max_concurrency must be at most {}",
                MAX_CONCURRENCY_LIMIT
            )));
        }
        if matches!(&self.schema, Some(schema) if schema.trim().is_empty()) {
            return Err(SourceError::config("schema must not be blank when set"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// JSON schema describing this config, served by the `spec` command.
    pub fn json_schema() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "Sluice SQL Source Spec",
            "type": "object",
            "required": ["host", "database", "username"],
            "additionalProperties": false,
            "properties": {
                "host": {
                    "type": "string",
                    "title": "Host",
                    "description": "Hostname of the database server.",
                    "order": 0
                },
                "port": {
                    "type": "integer",
                    "title": "Port",
                    "minimum": 1,
                    "maximum": 65535,
                    "default": DEFAULT_PORT,
                    "order": 1
                },
                "database": {
                    "type": "string",
                    "title": "Database",
                    "description": "Database to read from.",
                    "order": 2
                },
                "username": {
                    "type": "string",
                    "title": "Username",
                    "order": 3
                },
                "password": {
                    "type": "string",
                    "title": "Password",
                    "writeOnly": true,
                    "order": 4
                },
                "schema": {
                    "type": "string",
                    "title": "Schema",
                    "description": "Schema to discover. Defaults to the session's current schema.",
                    "order": 5
                },
                "ssl_mode": {
                    "type": "string",
                    "title": "SSL mode",
                    "enum": ["disable", "prefer", "require"],
                    "default": "prefer",
                    "order": 6
                },
                "connect_timeout_secs": {
                    "type": "integer",
                    "title": "Connect timeout (seconds)",
                    "minimum": 1,
                    "default": DEFAULT_CONNECT_TIMEOUT_SECS,
                    "order": 7
                },
                "fetch_size": {
                    "type": "integer",
                    "title": "Rows per fetch",
                    "minimum": 1,
                    "default": DEFAULT_FETCH_SIZE,
                    "order": 8
                },
                "max_concurrency": {
                    "type": "integer",
                    "title": "Discovery sessions",
                    "description": "Maximum sessions opened in parallel while describing tables.",
                    "minimum": 1,
                    "maximum": MAX_CONCURRENCY_LIMIT,
                    "default": DEFAULT_MAX_CONCURRENCY,
                    "order": 9
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let config = ConnectionConfig::from_json_str(
            r#"{"host": "db", "database": "app", "username": "reader"}"#,
        )
        .unwrap();

        assert_eq!(config.port, 5432);
        assert_eq!(config.schema, None);
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.fetch_size, 1000);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.password.is_empty());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("db", "app", "reader", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
        assert_eq!(config.password.expose(), "hunter2");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = ConnectionConfig::from_json_str(
            r#"{"host": "db", "database": "app", "username": "u", "engine": "x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let err = ConnectionConfig::new(" ", "app", "u", "p").validate().unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ConnectionConfig::new("db", "app", "u", "p");
        config.fetch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectionConfig::new("db", "app", "u", "p");
        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectionConfig::new("db", "app", "u", "p");
        config.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_concurrency() {
        let err = ConnectionConfig::from_json_str(
            r#"{"host": "db", "database": "app", "username": "u", "max_concurrency": 18446744073709551615}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
        assert!(err.to_string().contains("at most 256"), "{err}");

        let mut config = ConnectionConfig::new("db", "app", "u", "p");
        config.max_concurrency = MAX_CONCURRENCY_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ssl_mode_parses_snake_case() {
        let config = ConnectionConfig::from_json_str(
            r#"{"host": "db", "database": "app", "username": "u", "ssl_mode": "require"}"#,
        )
        .unwrap();
        assert_eq!(config.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_json_schema_lists_required_fields() {
        let schema = ConnectionConfig::json_schema();
        assert_eq!(
            schema["required"],
            serde_json::json!(["host", "database", "username"])
        );
        assert!(schema["properties"]["password"]["writeOnly"]
            .as_bool()
            .unwrap());
    }
}
