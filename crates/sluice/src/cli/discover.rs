//! `sluice discover`

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use sluice_protocol::Message;
use sluice_source::{discover, ConnectionManager};
use tracing::info;

use super::config::load_connection_config;
use super::output::MessageWriter;

#[derive(Debug)]
pub struct DiscoverArgs {
    pub config: PathBuf,
}

/// Write the catalog of every visible table.
///
/// Must not be called from inside a Tokio runtime: discovery gets a runtime
/// of its own for the lifetime of the command.
pub fn run<W: Write>(
    args: DiscoverArgs,
    manager: &ConnectionManager,
    out: &mut MessageWriter<W>,
) -> Result<()> {
    let config = load_connection_config(&args.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sluice-discover")
        .build()
        .context("Failed to start async runtime")?;
    let catalog = runtime.block_on(discover(manager, &config))?;

    info!(streams = catalog.len(), "Writing catalog");
    out.write(&Message::from(catalog.to_wire()))?;
    out.flush()
}
