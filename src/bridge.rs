// src/bridge.rs
use alloy::primitives::{Address, Bytes, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::chain::ChainClient;
use crate::config::RetryConfig;
use crate::error::{FleetError, FleetResult};
use crate::pacing::sleep_cancellable;

/// Selector of the bridge deposit call on the source-chain contract.
pub const BRIDGE_SELECTOR: [u8; 4] = [0xe1, 0x10, 0x13, 0xdd];
/// Destination tag word carried by every bridge call.
pub const BRIDGE_DEST_TAG: u64 = 0x030d40;
/// Opaque ASCII payload the deployed contract expects, preserved verbatim.
pub const BRIDGE_PAYLOAD: &str = "bridgg\n";

/// Encode the bridge deposit calldata: selector, padded recipient, the
/// destination tag, then the payload as dynamic bytes. The layout must match
/// the deployed contract byte for byte.
pub fn encode_bridge_call(recipient: Address, dest_tag: u64, payload: &str) -> Bytes {
    let payload_bytes = payload.as_bytes();
    let padded_len = payload_bytes.len().div_ceil(32) * 32;

    let mut data = Vec::with_capacity(4 + 32 * 4 + padded_len);
    data.extend_from_slice(&BRIDGE_SELECTOR);
    // recipient, left-padded to a word
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient.as_slice());
    // destination tag
    data.extend_from_slice(&U256::from(dest_tag).to_be_bytes::<32>());
    // offset of the dynamic bytes argument (always the third slot here)
    data.extend_from_slice(&U256::from(0x60u64).to_be_bytes::<32>());
    // payload length + right-padded payload
    data.extend_from_slice(&U256::from(payload_bytes.len()).to_be_bytes::<32>());
    data.extend_from_slice(payload_bytes);
    data.resize(data.len() + (padded_len - payload_bytes.len()), 0);

    Bytes::from(data)
}

/// Inverse of [`encode_bridge_call`]; exists to assert byte-exact round
/// trips in tests.
pub fn decode_bridge_call(data: &[u8]) -> FleetResult<(Address, u64, String)> {
    let err = |msg: &str| FleetError::Rpc(format!("malformed bridge calldata: {}", msg));

    if data.len() < 4 + 32 * 4 || data[..4] != BRIDGE_SELECTOR {
        return Err(err("bad selector or truncated"));
    }
    let words = &data[4..];
    let recipient = Address::from_slice(&words[12..32]);
    let dest_tag = U256::from_be_slice(&words[32..64]);
    let offset = U256::from_be_slice(&words[64..96]);
    if offset != U256::from(0x60u64) {
        return Err(err("unexpected bytes offset"));
    }
    let len = usize::try_from(U256::from_be_slice(&words[96..128]))
        .map_err(|_| err("length word out of range"))?;
    if len > words.len() || words.len() < 128 + len {
        return Err(err("payload shorter than declared length"));
    }
    let payload = String::from_utf8(words[128..128 + len].to_vec())
        .map_err(|_| err("payload is not UTF-8"))?;
    let dest_tag = u64::try_from(dest_tag).map_err(|_| err("destination tag out of range"))?;
    Ok((recipient, dest_tag, payload))
}

/// A bridge transfer being tracked on the destination chain.
#[derive(Debug, Clone)]
pub struct BridgeWatch {
    pub source_tx: TxHash,
    pub account: Address,
    /// Destination-chain balance snapshotted before the source tx existed.
    pub start_balance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    Completed {
        /// Best-effort match of the inbound destination transaction.
        dest_tx: Option<TxHash>,
        received: U256,
    },
    TimedOut,
    /// Shutdown fired mid-watch; nothing to report.
    Cancelled,
}

/// Polls the destination chain until a bridged transfer is observed or the
/// attempt budget runs out.
pub struct BridgeMonitor {
    client: Arc<dyn ChainClient>,
    max_attempts: u32,
    poll_interval: Duration,
    max_reconnects: u32,
}

impl BridgeMonitor {
    pub fn new(client: Arc<dyn ChainClient>, retry: &RetryConfig) -> Self {
        Self {
            client,
            max_attempts: retry.bridge_poll_attempts,
            poll_interval: Duration::from_secs(retry.bridge_poll_interval_secs),
            max_reconnects: retry.bridge_reconnect_attempts,
        }
    }

    #[cfg(test)]
    fn with_timing(
        client: Arc<dyn ChainClient>,
        max_attempts: u32,
        poll_interval: Duration,
        max_reconnects: u32,
    ) -> Self {
        Self { client, max_attempts, poll_interval, max_reconnects }
    }

    /// Run the watch to completion. RPC errors retry the same attempt via
    /// reconnect and do not consume the poll budget; only the reconnect
    /// budget bounds them.
    pub async fn watch(
        &self,
        watch: &BridgeWatch,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FleetResult<BridgeOutcome> {
        let mut attempt = 0u32;
        let mut reconnects = 0u32;

        while attempt < self.max_attempts {
            if *shutdown.borrow() {
                return Ok(BridgeOutcome::Cancelled);
            }

            match self.client.get_balance(watch.account).await {
                Ok(balance) if balance > watch.start_balance => {
                    let received = balance - watch.start_balance;
                    let dest_tx = self.find_inbound_tx(watch.account).await;
                    tracing::info!(
                        account = %watch.account,
                        source_tx = %watch.source_tx,
                        received = %received,
                        "bridge transfer arrived on destination chain"
                    );
                    return Ok(BridgeOutcome::Completed { dest_tx, received });
                }
                Ok(_) => {
                    attempt += 1;
                    tracing::debug!(
                        account = %watch.account,
                        progress = format!("{}/{}", attempt, self.max_attempts),
                        "waiting for bridge completion"
                    );
                    if attempt < self.max_attempts
                        && sleep_cancellable(self.poll_interval, shutdown).await
                    {
                        return Ok(BridgeOutcome::Cancelled);
                    }
                }
                Err(e) if e.is_retryable() => {
                    reconnects += 1;
                    if reconnects > self.max_reconnects {
                        return Err(FleetError::Connection(format!(
                            "bridge watch gave up after {} reconnect attempts: {}",
                            self.max_reconnects, e
                        )));
                    }
                    tracing::warn!(
                        account = %watch.account,
                        reconnects,
                        error = %e,
                        "poll failed, reconnecting"
                    );
                    self.client.reconnect().await?;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            account = %watch.account,
            source_tx = %watch.source_tx,
            "bridge watch timed out, check the destination balance manually"
        );
        Ok(BridgeOutcome::TimedOut)
    }

    /// Scan the latest destination block for a positive-value transfer to
    /// the account. Best effort: scan failures fall back to the balance
    /// delta alone.
    async fn find_inbound_tx(&self, account: Address) -> Option<TxHash> {
        match self.client.latest_block_transfers().await {
            Ok(transfers) => transfers
                .iter()
                .find(|t| t.to == Some(account) && t.value > U256::ZERO)
                .map(|t| t.hash),
            Err(e) => {
                tracing::debug!(error = %e, "could not scan destination block");
                None
            }
        }
    }
}
