//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed or mistyped JSON
    #[error("Invalid protocol JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A message line did not contain anything
    #[error("Empty message line")]
    EmptyLine,
}
