//! Sluice connector harness.
//!
//! The binary in `main.rs` parses arguments, installs logging and hands the
//! selected [`cli::Command`] to [`cli::dispatch`] together with a PostgreSQL
//! [`sluice_source::ConnectionManager`]. Everything else lives here so it can
//! be driven against the fake transport in tests.

pub mod cli;
