//! CLI Command Implementations

pub mod fuzz;
pub mod inspect;
pub mod replay;

use anyhow::{Context, Result};
use boostledger_core::LedgerConfig;
use std::path::Path;

/// Load the ledger configuration.
///
/// A config file wins; otherwise `BOOSTLEDGER_*` environment variables are applied over the
/// defaults.
pub fn load_config(path: Option<&Path>) -> Result<LedgerConfig> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file {}", p.display()))?;
            LedgerConfig::from_json_str(&raw)
                .with_context(|| format!("Invalid config file {}", p.display()))
        }
        None => LedgerConfig::from_env().context("Invalid BOOSTLEDGER_* environment"),
    }
}
