//! `sluice spec`

use std::io::Write;

use anyhow::Result;
use sluice_protocol::{ConnectorSpecification, Message};
use sluice_source::{ConnectionConfig, SUPPORTED_SYNC_MODES};

use super::output::MessageWriter;

/// What the connector accepts and how it syncs.
pub fn specification() -> ConnectorSpecification {
    ConnectorSpecification {
        connection_specification: ConnectionConfig::json_schema(),
        supported_sync_modes: SUPPORTED_SYNC_MODES.to_vec(),
        documentation_url: None,
    }
}

pub fn run<W: Write>(out: &mut MessageWriter<W>) -> Result<()> {
    out.write(&Message::from(specification()))?;
    out.flush()
}
