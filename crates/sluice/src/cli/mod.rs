//! Subcommands of the `sluice` binary.
//!
//! Each command writes protocol messages through a [`MessageWriter`]; nothing
//! else is printed to stdout.

pub mod check;
pub mod config;
pub mod discover;
pub mod error;
pub mod output;
pub mod read;
pub mod spec;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use sluice_source::ConnectionManager;
use tracing::{error, warn};

use self::output::MessageWriter;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the JSON schema of the connection config
    Spec,

    /// Verify the credentials can open a session and run a query
    Check {
        /// Connection config (JSON)
        #[arg(long)]
        config: PathBuf,
    },

    /// List tables and their column schemas
    Discover {
        /// Connection config (JSON)
        #[arg(long)]
        config: PathBuf,
    },

    /// Stream every row of the configured tables
    Read {
        /// Connection config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Configured catalog selecting tables and columns (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Sync state; accepted but unused since every read is a full refresh
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Spec => "spec",
            Command::Check { .. } => "check",
            Command::Discover { .. } => "discover",
            Command::Read { .. } => "read",
        }
    }
}

/// Run one command.
///
/// A failure is logged and written as a `TRACE` error message before it is
/// returned, so the caller only has to pick the exit code.
pub fn dispatch<W: Write>(
    command: Command,
    manager: &ConnectionManager,
    out: &mut MessageWriter<W>,
) -> Result<()> {
    let name = command.name();
    let result = match command {
        Command::Spec => spec::run(out),
        Command::Check { config } => check::run(check::CheckArgs { config }, manager, out),
        Command::Discover { config } => {
            discover::run(discover::DiscoverArgs { config }, manager, out)
        }
        Command::Read {
            config,
            catalog,
            state,
        } => read::run(
            read::ReadArgs {
                config,
                catalog,
                state,
            },
            manager,
            out,
        ),
    };

    if let Err(err) = &result {
        error!(command = name, error = %format!("{:#}", err), "Command failed");
        let trace = error::trace_message(err, output::now_millis());
        if let Err(write_err) = out.write(&trace).and_then(|()| out.flush()) {
            warn!(error = %write_err, "Failed to write error trace");
        }
    }
    result
}
