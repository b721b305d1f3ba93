//! Sluice connector protocol
//!
//! Every connector command writes its results to stdout as one JSON message
//! per line. Each message carries a `type` tag and exactly one payload:
//!
//! ```text
//! {"type":"SPEC","spec":{...}}
//! {"type":"CONNECTION_STATUS","connectionStatus":{"status":"SUCCEEDED"}}
//! {"type":"CATALOG","catalog":{"streams":[...]}}
//! {"type":"RECORD","record":{"stream":"users","data":{...},"emitted_at":1700000000000}}
//! {"type":"TRACE","trace":{"type":"ERROR",...}}
//! ```
//!
//! Inputs handed to a connector (the configured catalog and the opaque
//! state blob) use the same JSON conventions.

pub mod error;
pub mod message;
pub mod types;

pub use error::ProtocolError;
pub use message::Message;
pub use types::{
    Catalog, ConfiguredCatalog, ConfiguredStream, ConnectionStatus, ConnectorSpecification,
    DestinationSyncMode, ErrorDetails, FailureType, RecordMessage, Status, Stream, SyncMode,
    TraceMessage, TraceType,
};
