//! `sluice check`

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use sluice_protocol::{ConnectionStatus, Message};
use sluice_source::{ConnectionConfig, ConnectionManager};
use tracing::{info, warn};

use super::config::read_input;
use super::output::MessageWriter;

#[derive(Debug)]
pub struct CheckArgs {
    pub config: PathBuf,
}

/// Report whether the config can reach the store.
///
/// A bad config or a refused connection is a `FAILED` status, not a command
/// failure; only an unreadable config file or broken output is an error.
pub fn run<W: Write>(
    args: CheckArgs,
    manager: &ConnectionManager,
    out: &mut MessageWriter<W>,
) -> Result<()> {
    let raw = read_input(&args.config)?;

    let status = match ConnectionConfig::from_json_str(&raw) {
        Ok(config) => manager.check(&config),
        Err(e) => {
            warn!(error = %e, "Rejected connection config");
            ConnectionStatus::failed(format!("An exception occurred: {}", e))
        }
    };
    info!(
        connector = manager.connector_name(),
        succeeded = status.is_success(),
        "Check finished"
    );

    out.write(&Message::from(status))?;
    out.flush()
}
