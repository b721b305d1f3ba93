//! Loading the files handed to a command.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use sluice_protocol::ConfiguredCatalog;
use sluice_source::{ConfiguredSelection, ConnectionConfig, SourceError};

/// Read a whole input file; an unreadable file is a configuration problem.
pub fn read_input(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| SourceError::config(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(raw)
}

/// Parse and validate a connection config file.
pub fn load_connection_config(path: &Path) -> Result<ConnectionConfig> {
    let raw = read_input(path)?;
    ConnectionConfig::from_json_str(&raw)
        .with_context(|| format!("Invalid connection config in {}", path.display()))
}

/// Parse a configured catalog into the tables and columns to read.
pub fn load_selection(path: &Path) -> Result<ConfiguredSelection> {
    let raw = read_input(path)?;
    let catalog = ConfiguredCatalog::from_json_str(&raw)
        .with_context(|| format!("Invalid configured catalog in {}", path.display()))?;
    Ok(ConfiguredSelection::from_configured_catalog(&catalog))
}

/// Parse a state blob. Reads never resume, so the value is only checked for
/// being JSON.
pub fn load_state(path: &Path) -> Result<Value> {
    let raw = read_input(path)?;
    let state = serde_json::from_str(&raw)
        .map_err(|e| SourceError::config(format!("malformed state: {}", e)))
        .with_context(|| format!("Invalid state in {}", path.display()))?;
    Ok(state)
}
