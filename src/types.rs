// src/types.rs
use alloy::primitives::{Address, TxHash, U256};
use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FleetError;

/// One independently-keyed account in the fleet.
///
/// Immutable once loaded; owned exclusively by a single scheduler task for
/// its lifetime.
#[derive(Debug, Clone)]
pub struct Account {
    pub signer: PrivateKeySigner,
    pub address: Address,
    /// Position in the key file, used for log prefixes only.
    pub index: usize,
}

impl Account {
    pub fn from_private_key(key: &str, index: usize) -> Result<Self, FleetError> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|e| FleetError::InvalidKey(format!("key #{}: {}", index + 1, e)))?;
        let address = signer.address();
        Ok(Self { signer, address, index })
    }

    /// Short label for log lines, e.g. "account 3 (0x1234..abcd)".
    pub fn label(&self) -> String {
        let addr = self.address.to_string();
        format!("account {} ({}..{})", self.index + 1, &addr[..6], &addr[addr.len() - 4..])
    }
}

/// The repeatable on-chain actions the scheduler can plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    WrapUnwrap,
    SelfTransfer,
    BridgeSend,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] =
        [ActionKind::WrapUnwrap, ActionKind::SelfTransfer, ActionKind::BridgeSend];

    /// Stable key used by the quota store.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::WrapUnwrap => "wrap_unwrap",
            ActionKind::SelfTransfer => "self_transfer",
            ActionKind::BridgeSend => "bridge_send",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condensed transaction receipt returned by the chain client.
#[derive(Debug, Clone)]
pub struct ReceiptSummary {
    pub hash: TxHash,
    pub gas_used: u64,
    pub reverted: bool,
}

/// A transfer observed in the latest destination-chain block.
#[derive(Debug, Clone)]
pub struct InboundTransfer {
    pub to: Option<Address>,
    pub value: U256,
    pub hash: TxHash,
}

/// Result of running one planned action.
#[derive(Debug)]
pub enum TransactionOutcome {
    Success { hash: TxHash, gas_used: u64 },
    /// The action was not worth a transaction (dust amount); not a failure.
    Skipped { reason: String },
    Failed { error: FleetError },
}

impl TransactionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionOutcome::Success { .. })
    }
}
