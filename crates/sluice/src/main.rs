//! `sluice` connector binary.
//!
//! Protocol messages go to stdout, one JSON object per line. Logs go to
//! stderr and, with `--log-dir`, to a rotated file.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sluice::cli::{self, output::MessageWriter, Command};
use sluice_logging::{init_logging, LogConfig};
use sluice_source::postgres::PostgresConnector;
use sluice_source::ConnectionManager;

#[derive(Parser, Debug)]
#[command(
    name = "sluice",
    version,
    about = "Discover and extract tables from a SQL store as JSON messages"
)]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also write logs to <DIR>/sluice.log
    #[arg(long, global = true, env = "SLUICE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "sluice",
        verbose: cli.verbose,
        log_dir: cli.log_dir.as_deref(),
    }) {
        eprintln!("Warning: {:#}", err);
    }

    let manager = ConnectionManager::new(Arc::new(PostgresConnector::new()));
    let mut out = MessageWriter::new(io::BufWriter::new(io::stdout().lock()));

    match cli::dispatch(cli.command, &manager, &mut out) {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported as a TRACE message and logged
        Err(_) => ExitCode::from(1),
    }
}
