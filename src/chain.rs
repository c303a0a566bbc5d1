// src/chain.rs
use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::config::{NetworkConfig, RetryConfig};
use crate::error::{FleetError, FleetResult, connection_like};
use crate::types::{InboundTransfer, ReceiptSummary};

/// JSON-RPC boundary used by the executor, monitor and scheduler.
///
/// Kept object-safe so tests can script balances, receipts and failures
/// without a live endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: Address) -> FleetResult<U256>;
    async fn call(&self, tx: TransactionRequest) -> FleetResult<Bytes>;
    async fn estimate_gas(&self, tx: TransactionRequest) -> FleetResult<u64>;
    async fn send_transaction(&self, tx: TransactionRequest) -> FleetResult<TxHash>;
    async fn wait_for_receipt(&self, hash: TxHash) -> FleetResult<ReceiptSummary>;
    /// Transactions of the latest block, reduced to recipient/value/hash.
    async fn latest_block_transfers(&self) -> FleetResult<Vec<InboundTransfer>>;
    async fn health_check(&self) -> bool;
    /// Rebuild the underlying connection with exponential backoff.
    async fn reconnect(&self) -> FleetResult<()>;
}

/// Exponential backoff delay: base doubling per attempt, capped.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let factor = 1u64 << attempt.min(20);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

/// Production client: one signed alloy provider per (account, network) pair.
pub struct RpcChainClient {
    network: NetworkConfig,
    signer: PrivateKeySigner,
    retry: RetryConfig,
    provider: RwLock<DynProvider>,
}

impl RpcChainClient {
    /// Connect to the network's RPC endpoint, verifying reachability before
    /// returning. Fails with a fatal connection error once the attempt
    /// budget is exhausted.
    pub async fn connect(
        network: &NetworkConfig,
        signer: PrivateKeySigner,
        retry: &RetryConfig,
    ) -> FleetResult<Self> {
        let provider = build_provider(&network.rpc_url, &signer)?;
        let client = Self {
            network: network.clone(),
            signer,
            retry: retry.clone(),
            provider: RwLock::new(provider),
        };
        client.reconnect().await?;
        Ok(client)
    }

    async fn provider(&self) -> DynProvider {
        self.provider.read().await.clone()
    }

    fn classify(&self, context: &str, raw: String, fallback: fn(String) -> FleetError) -> FleetError {
        if connection_like(&raw) {
            FleetError::Connection(format!("{}: {}", context, raw))
        } else {
            fallback(format!("{}: {}", context, raw))
        }
    }
}

fn build_provider(rpc_url: &str, signer: &PrivateKeySigner) -> FleetResult<DynProvider> {
    let url = rpc_url
        .parse::<url::Url>()
        .map_err(|e| FleetError::Configuration(format!("invalid RPC URL {}: {}", rpc_url, e)))?;
    let provider = ProviderBuilder::new()
        .wallet(signer.clone())
        .connect_http(url);
    Ok(provider.erased())
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_balance(&self, address: Address) -> FleetResult<U256> {
        self.provider()
            .await
            .get_balance(address)
            .await
            .map_err(|e| self.classify("get_balance", e.to_string(), FleetError::Rpc))
    }

    async fn call(&self, tx: TransactionRequest) -> FleetResult<Bytes> {
        self.provider()
            .await
            .call(tx)
            .await
            .map_err(|e| self.classify("call", e.to_string(), FleetError::Rpc))
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> FleetResult<u64> {
        self.provider()
            .await
            .estimate_gas(tx)
            .await
            .map_err(|e| self.classify("estimate_gas", e.to_string(), FleetError::Estimation))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> FleetResult<TxHash> {
        let pending = self
            .provider()
            .await
            .send_transaction(tx)
            .await
            .map_err(|e| self.classify("send_transaction", e.to_string(), FleetError::Submission))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> FleetResult<ReceiptSummary> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.retry.receipt_timeout_secs);
        loop {
            let found = self
                .provider()
                .await
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| self.classify("get_receipt", e.to_string(), FleetError::Rpc))?;
            if let Some(receipt) = found {
                return Ok(ReceiptSummary {
                    hash,
                    gas_used: receipt.gas_used as u64,
                    reverted: !receipt.status(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FleetError::ReceiptTimeout(hash.to_string()));
            }
            sleep(Duration::from_millis(self.retry.receipt_poll_ms)).await;
        }
    }

    async fn latest_block_transfers(&self) -> FleetResult<Vec<InboundTransfer>> {
        let block = self
            .provider()
            .await
            .get_block_by_number(BlockNumberOrTag::Latest)
            .full()
            .await
            .map_err(|e| self.classify("get_block", e.to_string(), FleetError::Rpc))?;
        let Some(block) = block else {
            return Ok(Vec::new());
        };
        let transfers = block
            .transactions
            .as_transactions()
            .unwrap_or_default()
            .iter()
            .map(|tx| InboundTransfer {
                to: tx.to(),
                value: tx.value(),
                hash: tx.tx_hash(),
            })
            .collect();
        Ok(transfers)
    }

    async fn health_check(&self) -> bool {
        self.provider().await.get_chain_id().await.is_ok()
    }

    async fn reconnect(&self) -> FleetResult<()> {
        for attempt in 0..self.retry.max_connect_attempts {
            if attempt > 0 {
                let delay =
                    backoff_delay(attempt - 1, self.retry.backoff_base_ms, self.retry.backoff_cap_ms);
                tracing::warn!(
                    network = %self.network.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "RPC unreachable, retrying"
                );
                sleep(delay).await;
            }

            let provider = build_provider(&self.network.rpc_url, &self.signer)?;
            match provider.get_chain_id().await {
                Ok(chain_id) => {
                    if chain_id != self.network.chain_id {
                        return Err(FleetError::Configuration(format!(
                            "endpoint {} reports chain id {}, expected {}",
                            self.network.rpc_url, chain_id, self.network.chain_id
                        )));
                    }
                    *self.provider.write().await = provider;
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(network = %self.network.name, error = %e, "connect attempt failed");
                }
            }
        }
        Err(FleetError::Connection(format!(
            "failed to reach {} after {} attempts",
            self.network.rpc_url, self.retry.max_connect_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0, 1_000, 30_000), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1, 1_000, 30_000), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(4, 1_000, 30_000), Duration::from_millis(16_000));
        // Capped at 30s regardless of attempt count.
        assert_eq!(backoff_delay(6, 1_000, 30_000), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(63, 1_000, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_build_provider_rejects_bad_url() {
        let signer = PrivateKeySigner::random();
        let err = build_provider("not a url", &signer).unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }
}
