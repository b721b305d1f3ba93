//! Turning command failures into `TRACE` messages.

use sluice_protocol::{FailureType, Message, ProtocolError};
use sluice_source::SourceError;

/// Who has to act on a failure: the user for bad config or credentials, the
/// operator for everything else.
pub fn failure_type(err: &anyhow::Error) -> FailureType {
    for cause in err.chain() {
        if let Some(source) = cause.downcast_ref::<SourceError>() {
            return if source.is_config_error() {
                FailureType::ConfigError
            } else {
                FailureType::SystemError
            };
        }
        // Configured catalogs are user input
        if cause.downcast_ref::<ProtocolError>().is_some() {
            return FailureType::ConfigError;
        }
    }
    FailureType::SystemError
}

/// Build the error trace for a failed command.
///
/// The message is the outermost context; the full chain goes into
/// `internal_message` when there is more than one layer.
pub fn trace_message(err: &anyhow::Error, emitted_at: i64) -> Message {
    let internal = (err.chain().count() > 1).then(|| format!("{:#}", err));
    Message::error_trace(err.to_string(), internal, failure_type(err), emitted_at)
}
