// src/executor.rs
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::bridge::{BRIDGE_DEST_TAG, BRIDGE_PAYLOAD, encode_bridge_call};
use crate::chain::ChainClient;
use crate::config::{FleetConfig, FractionActionConfig};
use crate::error::{FleetError, FleetResult};
use crate::types::{ActionKind, ReceiptSummary, TransactionOutcome};

alloy::sol! {
    /// Minimal wrapped-native-token surface.
    interface IWrappedNative {
        function deposit() external payable;
        function withdraw(uint256 wad) external;
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Runs one concrete action for one account and reports the outcome.
///
/// Wrap/unwrap and self-transfer run against the destination network; the
/// bridge deposit is submitted on the source network.
pub struct ActionExecutor {
    account: Address,
    source: Arc<dyn ChainClient>,
    dest: Arc<dyn ChainClient>,
    config: Arc<FleetConfig>,
}

impl ActionExecutor {
    pub fn new(
        account: Address,
        source: Arc<dyn ChainClient>,
        dest: Arc<dyn ChainClient>,
        config: Arc<FleetConfig>,
    ) -> Self {
        Self { account, source, dest, config }
    }

    pub async fn execute<R: Rng + Send>(
        &self,
        kind: ActionKind,
        rng: &mut R,
    ) -> TransactionOutcome {
        let result = match kind {
            ActionKind::WrapUnwrap => self.wrap_unwrap(rng).await,
            ActionKind::SelfTransfer => self.self_transfer(rng).await,
            ActionKind::BridgeSend => self.bridge_send().await,
        };
        match result {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(account = %self.account, %kind, %error, "action failed");
                TransactionOutcome::Failed { error }
            }
        }
    }

    /// Deposit a random fraction of the native balance into the wrapped
    /// token, then withdraw the full wrapped balance back. If nothing is
    /// wrapped after the deposit settles, the deposit alone counts.
    async fn wrap_unwrap<R: Rng + Send>(&self, rng: &mut R) -> FleetResult<TransactionOutcome> {
        let weth = self.wrapped_native()?;
        let balance = self.dest.get_balance(self.account).await?;
        let amount = fraction_of(balance, &self.config.actions.wrap_unwrap, rng);
        if let Some(skip) = self.dust_check("wrap", amount) {
            return Ok(skip);
        }

        tracing::info!(account = %self.account, amount = %amount, "wrapping native balance");
        let deposit_tx = TransactionRequest::default()
            .with_from(self.account)
            .with_to(weth)
            .with_value(amount)
            .with_input(IWrappedNative::depositCall {}.abi_encode());
        let deposit = self.submit_and_confirm(&self.dest, deposit_tx, true).await?;

        let wrapped = self.wrapped_balance(weth).await?;
        if wrapped.is_zero() {
            return Ok(TransactionOutcome::Success {
                hash: deposit.hash,
                gas_used: deposit.gas_used,
            });
        }

        tracing::info!(account = %self.account, amount = %wrapped, "unwrapping full wrapped balance");
        let withdraw_tx = TransactionRequest::default()
            .with_from(self.account)
            .with_to(weth)
            .with_input(IWrappedNative::withdrawCall { wad: wrapped }.abi_encode());
        let withdraw = self.submit_and_confirm(&self.dest, withdraw_tx, true).await?;

        Ok(TransactionOutcome::Success {
            hash: withdraw.hash,
            gas_used: deposit.gas_used + withdraw.gas_used,
        })
    }

    /// Send a random fraction of the native balance to the account itself.
    async fn self_transfer<R: Rng + Send>(&self, rng: &mut R) -> FleetResult<TransactionOutcome> {
        let balance = self.dest.get_balance(self.account).await?;
        let amount = fraction_of(balance, &self.config.actions.self_transfer, rng);
        if let Some(skip) = self.dust_check("self-transfer", amount) {
            return Ok(skip);
        }

        tracing::info!(account = %self.account, amount = %amount, "sending self-transfer");
        let tx = TransactionRequest::default()
            .with_from(self.account)
            .with_to(self.account)
            .with_value(amount);
        let receipt = self.submit_and_confirm(&self.dest, tx, true).await?;
        Ok(TransactionOutcome::Success { hash: receipt.hash, gas_used: receipt.gas_used })
    }

    /// Submit the fixed-format bridge deposit on the source network. Gas is
    /// estimated up front with a bounded retry budget; exhausting it fails
    /// the action with the last estimation error.
    async fn bridge_send(&self) -> FleetResult<TransactionOutcome> {
        let bridge = self.config.networks.source.bridge_contract.ok_or_else(|| {
            FleetError::Configuration("bridge_send requires a bridge_contract".to_string())
        })?;
        let amount = U256::from(self.config.actions.bridge_send.amount_wei);

        let tx = TransactionRequest::default()
            .with_from(self.account)
            .with_to(bridge)
            .with_value(amount)
            .with_input(encode_bridge_call(self.account, BRIDGE_DEST_TAG, BRIDGE_PAYLOAD));

        let gas_limit = self.estimate_with_retries(tx.clone()).await?;
        let tx = tx.with_gas_limit(gas_limit);

        tracing::info!(
            account = %self.account,
            amount = %amount,
            gas_limit,
            "sending bridge deposit on {}",
            self.config.networks.source.name
        );
        let receipt = self.submit_and_confirm(&self.source, tx, false).await?;
        Ok(TransactionOutcome::Success { hash: receipt.hash, gas_used: receipt.gas_used })
    }

    async fn estimate_with_retries(&self, tx: TransactionRequest) -> FleetResult<u64> {
        let attempts = self.config.retry.gas_estimate_attempts.max(1);
        let delay = Duration::from_millis(self.config.retry.gas_estimate_delay_ms);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.source.estimate_gas(tx.clone()).await {
                Ok(gas) => return Ok(gas),
                Err(e) => {
                    tracing::warn!(
                        account = %self.account,
                        attempt,
                        attempts,
                        error = %e,
                        "gas estimation failed"
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| FleetError::Estimation("no estimation attempts made".to_string())))
    }

    async fn submit_and_confirm(
        &self,
        client: &Arc<dyn ChainClient>,
        tx: TransactionRequest,
        on_destination: bool,
    ) -> FleetResult<ReceiptSummary> {
        let hash = client.send_transaction(tx).await?;
        let network = if on_destination {
            &self.config.networks.destination
        } else {
            &self.config.networks.source
        };
        tracing::info!(
            account = %self.account,
            tx = %network.explorer_tx_url(hash),
            "transaction sent, waiting for confirmation"
        );

        let receipt = client.wait_for_receipt(hash).await?;
        if receipt.reverted {
            return Err(FleetError::Reverted(network.explorer_tx_url(hash)));
        }
        tracing::info!(account = %self.account, gas_used = receipt.gas_used, "confirmed");
        Ok(receipt)
    }

    async fn wrapped_balance(&self, weth: Address) -> FleetResult<U256> {
        let query = TransactionRequest::default()
            .with_to(weth)
            .with_input(IWrappedNative::balanceOfCall { owner: self.account }.abi_encode());
        let raw = self.dest.call(query).await?;
        IWrappedNative::balanceOfCall::abi_decode_returns(&raw)
            .map_err(|e| FleetError::Rpc(format!("decoding balanceOf return: {}", e)))
    }

    fn wrapped_native(&self) -> FleetResult<Address> {
        self.config.networks.destination.wrapped_native.ok_or_else(|| {
            FleetError::Configuration("wrap_unwrap requires a wrapped_native contract".to_string())
        })
    }

    fn dust_check(&self, what: &str, amount: U256) -> Option<TransactionOutcome> {
        let dust = U256::from(self.config.limits.dust_threshold_wei);
        if amount < dust {
            tracing::warn!(account = %self.account, amount = %amount, "{} amount below dust threshold, skipping", what);
            Some(TransactionOutcome::Skipped {
                reason: format!("{} amount {} below dust threshold", what, amount),
            })
        } else {
            None
        }
    }
}

fn fraction_of(balance: U256, action: &FractionActionConfig, rng: &mut impl Rng) -> U256 {
    let pct = rng.gen_range(action.fraction_min_pct..=action.fraction_max_pct);
    balance * U256::from(pct) / U256::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BRIDGE_SELECTOR;
    use crate::types::InboundTransfer;
    use alloy::primitives::{Bytes, TxHash};
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Mutex;

    const ETH: u128 = 1_000_000_000_000_000_000;

    /// Stateful mock chain modelling native + wrapped balances and a
    /// simple gas ledger.
    struct MockChain {
        native: Mutex<U256>,
        wrapped: Mutex<U256>,
        sent: Mutex<Vec<TransactionRequest>>,
        estimate_failures: Mutex<u32>,
        send_failure: Mutex<Option<FleetError>>,
    }

    impl MockChain {
        fn with_native(native: U256) -> Self {
            Self {
                native: Mutex::new(native),
                wrapped: Mutex::new(U256::ZERO),
                sent: Mutex::new(Vec::new()),
                estimate_failures: Mutex::new(0),
                send_failure: Mutex::new(None),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn get_balance(&self, _address: Address) -> FleetResult<U256> {
            Ok(*self.native.lock().unwrap())
        }

        async fn call(&self, _tx: TransactionRequest) -> FleetResult<Bytes> {
            let wrapped = *self.wrapped.lock().unwrap();
            Ok(Bytes::from(IWrappedNative::balanceOfCall::abi_encode_returns(&wrapped)))
        }

        async fn estimate_gas(&self, _tx: TransactionRequest) -> FleetResult<u64> {
            let mut failures = self.estimate_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(FleetError::Estimation("node busy".into()));
            }
            Ok(120_000)
        }

        async fn send_transaction(&self, tx: TransactionRequest) -> FleetResult<TxHash> {
            if let Some(err) = self.send_failure.lock().unwrap().take() {
                return Err(err);
            }
            let value = tx.value.unwrap_or_default();
            let input = tx.input.input().cloned().unwrap_or_default();
            if input.starts_with(&IWrappedNative::depositCall::SELECTOR) {
                *self.native.lock().unwrap() -= value;
                *self.wrapped.lock().unwrap() += value;
            } else if input.starts_with(&IWrappedNative::withdrawCall::SELECTOR) {
                let wad = IWrappedNative::withdrawCall::abi_decode(&input).unwrap().wad;
                *self.wrapped.lock().unwrap() -= wad;
                *self.native.lock().unwrap() += wad;
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(tx);
            Ok(TxHash::repeat_byte(sent.len() as u8))
        }

        async fn wait_for_receipt(&self, hash: TxHash) -> FleetResult<ReceiptSummary> {
            Ok(ReceiptSummary { hash, gas_used: 21_000, reverted: false })
        }

        async fn latest_block_transfers(&self) -> FleetResult<Vec<InboundTransfer>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn reconnect(&self) -> FleetResult<()> {
            Ok(())
        }
    }

    fn executor(chain: Arc<MockChain>, config: FleetConfig) -> ActionExecutor {
        ActionExecutor::new(
            Address::repeat_byte(0x11),
            chain.clone(),
            chain,
            Arc::new(config),
        )
    }

    fn bridge_enabled_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.actions.bridge_send.enabled = true;
        config.retry.gas_estimate_delay_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_wrap_unwrap_returns_wrapped_balance_to_zero() {
        let chain = Arc::new(MockChain::with_native(U256::from(ETH)));
        let executor = executor(chain.clone(), FleetConfig::default());
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = executor.execute(ActionKind::WrapUnwrap, &mut rng).await;
        assert!(outcome.is_success(), "outcome: {:?}", outcome);

        // Deposit then withdraw; wrapped back to zero, native restored in
        // full (the mock does not charge gas).
        assert_eq!(chain.sent_count(), 2);
        assert_eq!(*chain.wrapped.lock().unwrap(), U256::ZERO);
        assert_eq!(*chain.native.lock().unwrap(), U256::from(ETH));
    }

    #[tokio::test]
    async fn test_wrap_amount_respects_fraction_range() {
        let chain = Arc::new(MockChain::with_native(U256::from(ETH)));
        let executor = executor(chain.clone(), FleetConfig::default());
        let mut rng = StdRng::seed_from_u64(9);

        executor.execute(ActionKind::WrapUnwrap, &mut rng).await;

        let sent = chain.sent.lock().unwrap();
        let deposited = sent[0].value.unwrap();
        assert!(deposited >= U256::from(ETH / 2), "deposited {}", deposited);
        assert!(deposited <= U256::from(ETH * 8 / 10), "deposited {}", deposited);
    }

    #[tokio::test]
    async fn test_dust_balance_skips_without_sending() {
        // 0.0001 ETH balance: every fraction falls below the dust threshold.
        let chain = Arc::new(MockChain::with_native(U256::from(ETH / 10_000)));
        let executor = executor(chain.clone(), FleetConfig::default());
        let mut rng = StdRng::seed_from_u64(1);

        let wrap = executor.execute(ActionKind::WrapUnwrap, &mut rng).await;
        let transfer = executor.execute(ActionKind::SelfTransfer, &mut rng).await;

        assert!(matches!(wrap, TransactionOutcome::Skipped { .. }));
        assert!(matches!(transfer, TransactionOutcome::Skipped { .. }));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_self_transfer_targets_own_address() {
        let chain = Arc::new(MockChain::with_native(U256::from(10 * ETH)));
        let executor = executor(chain.clone(), FleetConfig::default());
        let mut rng = StdRng::seed_from_u64(5);

        let outcome = executor.execute(ActionKind::SelfTransfer, &mut rng).await;
        assert!(outcome.is_success());

        let sent = chain.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.unwrap().to().copied(), Some(Address::repeat_byte(0x11)));
        let value = sent[0].value.unwrap();
        assert!(value >= U256::from(ETH) && value <= U256::from(2 * ETH), "value {}", value);
    }

    #[tokio::test]
    async fn test_bridge_send_carries_fixed_calldata_and_gas() {
        let chain = Arc::new(MockChain::with_native(U256::from(ETH)));
        let executor = executor(chain.clone(), bridge_enabled_config());
        let mut rng = StdRng::seed_from_u64(0);

        let outcome = executor.execute(ActionKind::BridgeSend, &mut rng).await;
        assert!(outcome.is_success(), "outcome: {:?}", outcome);

        let sent = chain.sent.lock().unwrap();
        let input = sent[0].input.input().unwrap();
        assert_eq!(&input[..4], &BRIDGE_SELECTOR);
        assert_eq!(sent[0].gas, Some(120_000));
        assert_eq!(sent[0].value.unwrap(), U256::from(100_000_000_000_000u128));
    }

    #[tokio::test]
    async fn test_bridge_gas_estimation_retries_then_succeeds() {
        let chain = Arc::new(MockChain::with_native(U256::from(ETH)));
        *chain.estimate_failures.lock().unwrap() = 2;
        let executor = executor(chain.clone(), bridge_enabled_config());
        let mut rng = StdRng::seed_from_u64(0);

        // Two failures, third attempt lands within the budget of 3.
        let outcome = executor.execute(ActionKind::BridgeSend, &mut rng).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_bridge_gas_estimation_exhausts_budget() {
        let chain = Arc::new(MockChain::with_native(U256::from(ETH)));
        *chain.estimate_failures.lock().unwrap() = 3;
        let executor = executor(chain.clone(), bridge_enabled_config());
        let mut rng = StdRng::seed_from_u64(0);

        let outcome = executor.execute(ActionKind::BridgeSend, &mut rng).await;
        match outcome {
            TransactionOutcome::Failed { error } => {
                assert!(matches!(error, FleetError::Estimation(_)))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_surfaces_as_retryable() {
        let chain = Arc::new(MockChain::with_native(U256::from(ETH)));
        *chain.send_failure.lock().unwrap() =
            Some(FleetError::Connection("socket reset".into()));
        let executor = executor(chain.clone(), FleetConfig::default());
        let mut rng = StdRng::seed_from_u64(5);

        let outcome = executor.execute(ActionKind::SelfTransfer, &mut rng).await;
        match outcome {
            TransactionOutcome::Failed { error } => assert!(error.is_retryable()),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
