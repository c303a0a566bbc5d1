// src/lib.rs
pub mod accounts;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod pacing;
pub mod quota;
pub mod scheduler;
pub mod types;

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::orchestrator::FleetOrchestrator;
use crate::types::Account;
use tokio::sync::watch;

/// Top-level entry point: a fleet of independently-keyed accounts running
/// randomized on-chain activity cycles against a source/destination chain
/// pair.
pub struct ChainFleet {
    orchestrator: FleetOrchestrator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ChainFleet {
    /// Build a fleet from an already-validated configuration and key set.
    pub fn new(config: FleetConfig, accounts: Vec<Account>) -> Result<Self, FleetError> {
        let orchestrator = FleetOrchestrator::new(config, accounts)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self { orchestrator, shutdown_tx, shutdown_rx })
    }

    /// Build a fleet from a JSON config file and a one-key-per-line file.
    pub fn from_files(
        config_path: impl AsRef<std::path::Path>,
        keys_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FleetError> {
        let config = FleetConfig::from_file(config_path)?;
        let accounts = accounts::load_accounts(keys_path)?;
        Self::new(config, accounts)
    }

    /// Signal handle for stopping the fleet from another task.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run all account schedulers to completion.
    pub async fn run(&self) -> FleetResult<()> {
        self.orchestrator.run(self.shutdown_rx.clone()).await
    }

    /// Scheduler restarts performed since startup, across all accounts.
    pub fn restart_count(&self) -> u32 {
        self.orchestrator.restart_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_fleet_requires_accounts() {
        let result = ChainFleet::new(FleetConfig::default(), Vec::new());
        assert!(matches!(result, Err(FleetError::Configuration(_))));
    }

    #[test]
    fn test_fleet_builds_with_defaults() {
        let account = Account::from_private_key(KEY_0, 0).unwrap();
        let fleet = ChainFleet::new(FleetConfig::default(), vec![account]).unwrap();
        assert_eq!(fleet.restart_count(), 0);
    }

    #[test]
    fn test_shutdown_handle_reaches_receiver() {
        let account = Account::from_private_key(KEY_0, 0).unwrap();
        let fleet = ChainFleet::new(FleetConfig::default(), vec![account]).unwrap();
        fleet.shutdown_handle().send(true).unwrap();
        assert!(*fleet.shutdown_rx.borrow());
    }
}
