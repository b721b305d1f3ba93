//! Payload types carried inside protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

// ============================================================================
// Sync modes
// ============================================================================

/// How a stream can be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Re-read the whole table on every sync
    #[default]
    FullRefresh,
    /// Read only rows past a cursor value
    Incremental,
}

/// How a destination should apply records. Carried through, never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
}

// ============================================================================
// Catalogs
// ============================================================================

/// One discoverable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    /// JSON schema object: `{"type": "object", "properties": {column: {...}}}`
    pub json_schema: Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Stream {
    /// Build a stream from an ordered property map.
    pub fn new(
        name: impl Into<String>,
        properties: Map<String, Value>,
        supported_sync_modes: Vec<SyncMode>,
    ) -> Self {
        let mut json_schema = Map::new();
        json_schema.insert("type".to_string(), Value::String("object".to_string()));
        json_schema.insert("properties".to_string(), Value::Object(properties));
        Self {
            name: name.into(),
            json_schema: Value::Object(json_schema),
            supported_sync_modes,
            namespace: None,
        }
    }

    /// Column names declared in `json_schema.properties`, in declaration order.
    ///
    /// Returns an empty list when the schema has no properties object.
    pub fn property_names(&self) -> Vec<String> {
        self.json_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Result of discovery: every stream the credentials can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub streams: Vec<Stream>,
}

/// A stream chosen for extraction, possibly with a narrowed schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    pub stream: Stream,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_sync_mode: Option<DestinationSyncMode>,
}

/// The selection handed to `read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Parse a configured catalog document.
    pub fn from_json_str(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One extracted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub data: Map<String, Value>,
    /// Milliseconds since the Unix epoch
    pub emitted_at: i64,
}

// ============================================================================
// Connection status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Succeeded,
    Failed,
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectionStatus {
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Succeeded
    }
}

// ============================================================================
// Connector specification
// ============================================================================

/// What a connector accepts as configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpecification {
    #[serde(rename = "connectionSpecification")]
    pub connection_specification: Value,
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(
        rename = "documentationUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub documentation_url: Option<String>,
}

// ============================================================================
// Traces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceType {
    Error,
}

/// Who is expected to fix a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Bad credentials or configuration supplied by the user
    ConfigError,
    /// Anything else
    SystemError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    pub failure_type: FailureType,
}

/// Terminal failure report emitted before a command exits non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    #[serde(rename = "type")]
    pub trace_type: TraceType,
    pub emitted_at: i64,
    pub error: ErrorDetails,
}
