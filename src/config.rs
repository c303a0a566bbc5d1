// src/config.rs
use alloy::primitives::{Address, TxHash, address};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FleetError, FleetResult};

/// Full runtime configuration, constructed once at startup and passed by
/// reference into every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub networks: NetworksConfig,
    pub actions: ActionsConfig,
    pub limits: LimitsConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworksConfig {
    /// Network the bridge transaction is submitted on.
    pub source: NetworkConfig,
    /// Network where activity runs and bridged funds arrive.
    pub destination: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    /// Prefix for human-readable transaction links, e.g. "https://.../tx/".
    pub explorer_tx_prefix: String,
    pub bridge_contract: Option<Address>,
    pub wrapped_native: Option<Address>,
}

impl NetworkConfig {
    pub fn explorer_tx_url(&self, hash: TxHash) -> String {
        format!("{}{}", self.explorer_tx_prefix, hash)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub wrap_unwrap: FractionActionConfig,
    pub self_transfer: FractionActionConfig,
    pub bridge_send: BridgeActionConfig,
}

impl ActionsConfig {
    /// Configured daily quota for a kind; zero when the kind is disabled.
    pub fn daily_count(&self, kind: crate::types::ActionKind) -> u32 {
        use crate::types::ActionKind::*;
        match kind {
            WrapUnwrap if self.wrap_unwrap.enabled => self.wrap_unwrap.daily_count,
            SelfTransfer if self.self_transfer.enabled => self.self_transfer.daily_count,
            BridgeSend if self.bridge_send.enabled => self.bridge_send.daily_count,
            _ => 0,
        }
    }
}

/// An action sized as a random fraction of the current native balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FractionActionConfig {
    pub enabled: bool,
    pub daily_count: u32,
    /// Inclusive percent bounds applied to the live balance.
    pub fraction_min_pct: u32,
    pub fraction_max_pct: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeActionConfig {
    pub enabled: bool,
    pub daily_count: u32,
    /// Fixed value carried by each bridge transaction, in wei.
    pub amount_wei: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Accounts below this native balance do not execute actions.
    pub min_operational_balance_wei: u128,
    /// Computed amounts below this are skipped as not worth the gas.
    pub dust_threshold_wei: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub inter_action_min_secs: u64,
    pub inter_action_max_secs: u64,
    pub inter_cycle_min_secs: u64,
    pub inter_cycle_max_secs: u64,
    /// Recheck delay while the balance sits below the operational minimum.
    pub low_balance_recheck_secs: u64,
    /// Pause after a non-retryable in-cycle failure before cooling down.
    pub failure_pause_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_connect_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub gas_estimate_attempts: u32,
    pub gas_estimate_delay_ms: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
    pub bridge_poll_attempts: u32,
    pub bridge_poll_interval_secs: u64,
    pub bridge_reconnect_attempts: u32,
    /// Scheduler restarts allowed per account within the restart window.
    pub max_restarts_per_window: u32,
    pub restart_window_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            networks: NetworksConfig::default(),
            actions: ActionsConfig::default(),
            limits: LimitsConfig::default(),
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self {
            source: NetworkConfig {
                name: "sepolia".to_string(),
                rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                chain_id: 11155111,
                explorer_tx_prefix: "https://sepolia.etherscan.io/tx/".to_string(),
                bridge_contract: Some(address!("ea58fcA6849d79EAd1f26608855c2D6407d54Ce2")),
                wrapped_native: None,
            },
            destination: NetworkConfig {
                name: "unichain-sepolia".to_string(),
                rpc_url: "https://sepolia.unichain.org".to_string(),
                chain_id: 1301,
                explorer_tx_prefix: "https://sepolia.uniscan.xyz/tx/".to_string(),
                bridge_contract: None,
                wrapped_native: Some(address!("4200000000000000000000000000000000000006")),
            },
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            wrap_unwrap: FractionActionConfig {
                enabled: true,
                daily_count: 3,
                fraction_min_pct: 50,
                fraction_max_pct: 80,
            },
            self_transfer: FractionActionConfig {
                enabled: true,
                daily_count: 3,
                fraction_min_pct: 10,
                fraction_max_pct: 20,
            },
            bridge_send: BridgeActionConfig {
                enabled: false,
                daily_count: 1,
                // 0.0001 ETH
                amount_wei: 100_000_000_000_000,
            },
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            // 0.0015 ETH
            min_operational_balance_wei: 1_500_000_000_000_000,
            // 0.0001 ETH
            dust_threshold_wei: 100_000_000_000_000,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_action_min_secs: 10,
            inter_action_max_secs: 120,
            inter_cycle_min_secs: 60,
            inter_cycle_max_secs: 120,
            low_balance_recheck_secs: 30,
            failure_pause_secs: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            gas_estimate_attempts: 3,
            gas_estimate_delay_ms: 3_000,
            receipt_timeout_secs: 180,
            receipt_poll_ms: 2_000,
            bridge_poll_attempts: 30,
            bridge_poll_interval_secs: 30,
            bridge_reconnect_attempts: 5,
            max_restarts_per_window: 5,
            restart_window_secs: 3_600,
        }
    }
}

impl FleetConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> FleetResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FleetError::Configuration(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: FleetConfig = serde_json::from_str(&raw)
            .map_err(|e| FleetError::Configuration(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FleetResult<()> {
        for network in [&self.networks.source, &self.networks.destination] {
            url::Url::parse(&network.rpc_url).map_err(|e| {
                FleetError::Configuration(format!(
                    "invalid RPC URL for {}: {}",
                    network.name, e
                ))
            })?;
        }

        for (name, action) in [
            ("wrap_unwrap", &self.actions.wrap_unwrap),
            ("self_transfer", &self.actions.self_transfer),
        ] {
            if action.fraction_min_pct > action.fraction_max_pct {
                return Err(FleetError::Configuration(format!(
                    "{}: fraction_min_pct exceeds fraction_max_pct",
                    name
                )));
            }
            if action.fraction_max_pct > 100 {
                return Err(FleetError::Configuration(format!(
                    "{}: fraction_max_pct exceeds 100",
                    name
                )));
            }
        }

        if self.actions.wrap_unwrap.enabled && self.networks.destination.wrapped_native.is_none() {
            return Err(FleetError::Configuration(
                "wrap_unwrap enabled but no wrapped_native contract configured".to_string(),
            ));
        }
        if self.actions.bridge_send.enabled && self.networks.source.bridge_contract.is_none() {
            return Err(FleetError::Configuration(
                "bridge_send enabled but no bridge_contract configured".to_string(),
            ));
        }

        if self.pacing.inter_action_min_secs > self.pacing.inter_action_max_secs
            || self.pacing.inter_cycle_min_secs > self.pacing.inter_cycle_max_secs
        {
            return Err(FleetError::Configuration(
                "pacing ranges must satisfy min <= max".to_string(),
            ));
        }

        if !self.actions.wrap_unwrap.enabled
            && !self.actions.self_transfer.enabled
            && !self.actions.bridge_send.enabled
        {
            return Err(FleetError::Configuration(
                "no action kinds enabled".to_string(),
            ));
        }

        Ok(())
    }
}
