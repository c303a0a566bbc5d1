// src/accounts.rs
use std::path::Path;

use crate::error::{FleetError, FleetResult};
use crate::types::Account;

/// Load signing accounts from a key file, one hex private key per line.
///
/// Blank lines and `#` comments are ignored. An empty result is a fatal
/// configuration error: the fleet has nothing to schedule.
pub fn load_accounts(path: impl AsRef<Path>) -> FleetResult<Vec<Account>> {
    let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        FleetError::Configuration(format!(
            "failed to read key file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let accounts = parse_accounts(&raw)?;

    if accounts.is_empty() {
        return Err(FleetError::Configuration(
            "no accounts found in key file, add at least one private key".to_string(),
        ));
    }

    tracing::info!(count = accounts.len(), "loaded fleet accounts");
    Ok(accounts)
}

fn parse_accounts(raw: &str) -> FleetResult<Vec<Account>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(index, line)| Account::from_private_key(line, index))
        .collect()
}
