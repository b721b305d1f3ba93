//! The tagged message envelope written one per line to stdout.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{
    Catalog, ConnectionStatus, ConnectorSpecification, ErrorDetails, FailureType, RecordMessage,
    TraceMessage, TraceType,
};

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Record {
        record: RecordMessage,
    },
    Catalog {
        catalog: Catalog,
    },
    ConnectionStatus {
        #[serde(rename = "connectionStatus")]
        connection_status: ConnectionStatus,
    },
    Spec {
        spec: ConnectorSpecification,
    },
    Trace {
        trace: TraceMessage,
    },
}

impl Message {
    /// Build an error trace message.
    pub fn error_trace(
        message: impl Into<String>,
        internal_message: Option<String>,
        failure_type: FailureType,
        emitted_at: i64,
    ) -> Self {
        Message::Trace {
            trace: TraceMessage {
                trace_type: TraceType::Error,
                emitted_at,
                error: ErrorDetails {
                    message: message.into(),
                    internal_message,
                    failure_type,
                },
            },
        }
    }

    /// Serialize as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one line of connector output.
    pub fn parse_line(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        // Exact decimals only survive tag dispatch from a materialized Value
        let value: serde_json::Value = serde_json::from_str(line)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Message type tag as written on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Record { .. } => "RECORD",
            Message::Catalog { .. } => "CATALOG",
            Message::ConnectionStatus { .. } => "CONNECTION_STATUS",
            Message::Spec { .. } => "SPEC",
            Message::Trace { .. } => "TRACE",
        }
    }
}

impl From<RecordMessage> for Message {
    fn from(record: RecordMessage) -> Self {
        Message::Record { record }
    }
}

impl From<Catalog> for Message {
    fn from(catalog: Catalog) -> Self {
        Message::Catalog { catalog }
    }
}

impl From<ConnectionStatus> for Message {
    fn from(connection_status: ConnectionStatus) -> Self {
        Message::ConnectionStatus { connection_status }
    }
}

impl From<ConnectorSpecification> for Message {
    fn from(spec: ConnectorSpecification) -> Self {
        Message::Spec { spec }
    }
}
