//! `sluice read`

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use sluice_protocol::Message;
use sluice_source::{read, ConnectionManager};
use tracing::{debug, info};

use super::config::{load_connection_config, load_selection, load_state};
use super::output::{now_millis, MessageWriter};

#[derive(Debug)]
pub struct ReadArgs {
    pub config: PathBuf,
    pub catalog: PathBuf,
    pub state: Option<PathBuf>,
}

/// Stream a `RECORD` message for every row of the configured tables.
///
/// Records already written stay written when a table fails partway; the
/// failure is returned after the session has been released.
pub fn run<W: Write>(
    args: ReadArgs,
    manager: &ConnectionManager,
    out: &mut MessageWriter<W>,
) -> Result<()> {
    let config = load_connection_config(&args.config)?;
    let selection = load_selection(&args.catalog)?;
    if let Some(path) = &args.state {
        load_state(path)?;
        debug!(state = %path.display(), "Ignoring state, reading every table in full");
    }

    info!(streams = selection.len(), "Starting read");
    let session = manager.acquire(&config)?;
    let mut extraction = read(session, selection);

    for record in extraction.by_ref() {
        let envelope = record?;
        out.write(&Message::from(envelope.into_message(now_millis())))?;
    }

    info!(records = extraction.rows_emitted(), "Read finished");
    out.flush()
}
