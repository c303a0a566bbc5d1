// src/scheduler.rs
use alloy::primitives::U256;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::watch;

use crate::bridge::{BridgeMonitor, BridgeOutcome, BridgeWatch};
use crate::chain::ChainClient;
use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::executor::ActionExecutor;
use crate::pacing::{PacingPolicy, sleep_cancellable};
use crate::quota::{MemoryQuotaStore, QuotaTracker};
use crate::types::{Account, ActionKind, TransactionOutcome};

/// Per-cycle tally, logged when the cycle ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub executed: u32,
    pub skipped: u32,
    pub failed: u32,
    /// True when the cycle stopped early on an insufficient balance.
    pub aborted: bool,
}

/// Drives one account through its daily activity loop: wait for an
/// operational balance, build a shuffled plan from the remaining quotas,
/// execute it with randomized pacing, cool down, reset the quotas, repeat.
pub struct AccountScheduler {
    account: Account,
    source: Arc<dyn ChainClient>,
    dest: Arc<dyn ChainClient>,
    executor: ActionExecutor,
    quotas: Arc<QuotaTracker<MemoryQuotaStore>>,
    monitor: BridgeMonitor,
    pacing: PacingPolicy,
    config: Arc<FleetConfig>,
}

impl AccountScheduler {
    pub fn new(
        account: Account,
        source: Arc<dyn ChainClient>,
        dest: Arc<dyn ChainClient>,
        quotas: Arc<QuotaTracker<MemoryQuotaStore>>,
        config: Arc<FleetConfig>,
    ) -> Self {
        let executor =
            ActionExecutor::new(account.address, source.clone(), dest.clone(), config.clone());
        let monitor = BridgeMonitor::new(dest.clone(), &config.retry);
        let pacing = PacingPolicy::new(config.pacing.clone());
        Self { account, source, dest, executor, quotas, monitor, pacing, config }
    }

    /// Run cycles until shutdown fires. Returns `Err` only for errors the
    /// loop cannot absorb; the supervisor decides whether to restart.
    pub async fn run<R: Rng + Send>(
        &self,
        rng: &mut R,
        mut shutdown: watch::Receiver<bool>,
    ) -> FleetResult<()> {
        loop {
            if *shutdown.borrow() {
                tracing::info!(account = %self.account.label(), "shutting down");
                return Ok(());
            }

            if !self.wait_for_operational_balance(&mut shutdown).await? {
                return Ok(());
            }

            let report = self.run_cycle(rng, &mut shutdown).await?;
            tracing::info!(
                account = %self.account.label(),
                executed = report.executed,
                skipped = report.skipped,
                failed = report.failed,
                aborted = report.aborted,
                "cycle finished"
            );

            let pause = self.pacing.inter_cycle_delay(rng);
            tracing::info!(
                account = %self.account.label(),
                secs = pause.as_secs(),
                "cooling down before next cycle"
            );
            if sleep_cancellable(pause, &mut shutdown).await {
                return Ok(());
            }

            // One reset per cycle, aborted cycles included.
            self.quotas.reset_daily(self.account.address).await?;
        }
    }

    /// Block until the destination balance covers the operational minimum.
    /// Returns false when shutdown fires while waiting.
    async fn wait_for_operational_balance(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FleetResult<bool> {
        let min = U256::from(self.config.limits.min_operational_balance_wei);
        loop {
            if *shutdown.borrow() {
                return Ok(false);
            }
            match self.dest.get_balance(self.account.address).await {
                Ok(balance) if balance >= min => return Ok(true),
                Ok(balance) => {
                    tracing::warn!(
                        account = %self.account.label(),
                        balance = %balance,
                        min = %min,
                        "balance below operational minimum, waiting for top-up"
                    );
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(account = %self.account.label(), error = %e, "balance check failed, reconnecting");
                    self.dest.reconnect().await?;
                    continue;
                }
                Err(e) => return Err(e),
            }
            if sleep_cancellable(self.pacing.low_balance_recheck(), shutdown).await {
                return Ok(false);
            }
        }
    }

    /// Expand the remaining quotas into a flat plan and shuffle it so the
    /// kinds interleave unpredictably.
    async fn build_plan<R: Rng>(&self, rng: &mut R) -> FleetResult<Vec<ActionKind>> {
        let mut plan = Vec::new();
        for kind in ActionKind::ALL {
            let remaining = self.quotas.remaining(self.account.address, kind).await?;
            for _ in 0..remaining {
                plan.push(kind);
            }
        }
        plan.shuffle(rng);
        Ok(plan)
    }

    async fn run_cycle<R: Rng + Send>(
        &self,
        rng: &mut R,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FleetResult<CycleReport> {
        let plan = self.build_plan(rng).await?;
        tracing::info!(
            account = %self.account.label(),
            actions = plan.len(),
            "starting cycle"
        );

        let mut report = CycleReport::default();
        let min = U256::from(self.config.limits.min_operational_balance_wei);

        for (step, kind) in plan.iter().copied().enumerate() {
            if *shutdown.borrow() {
                return Ok(report);
            }

            // Cheap actions can still drain an account mid-cycle; re-verify
            // before every step. Transient RPC failures retry the read after
            // a reconnect rather than reading as an empty account.
            let balance = loop {
                match self.dest.get_balance(self.account.address).await {
                    Ok(balance) => break balance,
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(
                            account = %self.account.label(),
                            error = %e,
                            "mid-cycle balance check failed, reconnecting"
                        );
                        self.dest.reconnect().await?;
                    }
                    Err(e) => return Err(e),
                }
            };
            if balance < min {
                tracing::warn!(
                    account = %self.account.label(),
                    balance = %balance,
                    "balance dropped below minimum mid-cycle, aborting"
                );
                report.aborted = true;
                return Ok(report);
            }

            let baseline = if kind == ActionKind::BridgeSend {
                Some(self.dest.get_balance(self.account.address).await?)
            } else {
                None
            };

            tracing::info!(
                account = %self.account.label(),
                step = step + 1,
                total = plan.len(),
                %kind,
                "executing action"
            );
            match self.executor.execute(kind, rng).await {
                TransactionOutcome::Success { hash, .. } => {
                    report.executed += 1;
                    self.quotas.record_completion(self.account.address, kind).await?;
                    if kind == ActionKind::BridgeSend {
                        let watch = BridgeWatch {
                            source_tx: hash,
                            account: self.account.address,
                            start_balance: baseline.unwrap_or(U256::ZERO),
                        };
                        self.track_bridge(&watch, shutdown).await?;
                    }
                }
                TransactionOutcome::Skipped { reason } => {
                    report.skipped += 1;
                    tracing::info!(account = %self.account.label(), reason, "action skipped");
                }
                TransactionOutcome::Failed { error } => {
                    report.failed += 1;
                    if error.is_fatal() {
                        return Err(error);
                    }
                    if matches!(error, FleetError::InsufficientBalance { .. }) {
                        tracing::warn!(account = %self.account.label(), %error, "aborting cycle");
                        report.aborted = true;
                        return Ok(report);
                    }
                    if error.is_retryable() {
                        let client = if kind == ActionKind::BridgeSend {
                            &self.source
                        } else {
                            &self.dest
                        };
                        tracing::warn!(account = %self.account.label(), %error, "reconnecting after network failure");
                        client.reconnect().await?;
                    } else {
                        tracing::warn!(account = %self.account.label(), %error, "action failed, continuing");
                        if sleep_cancellable(self.pacing.failure_pause(), shutdown).await {
                            return Ok(report);
                        }
                    }
                }
            }

            if sleep_cancellable(self.pacing.inter_action_delay(rng), shutdown).await {
                return Ok(report);
            }
        }

        Ok(report)
    }

    /// Hold the loop until the bridged funds land or the watch budget runs
    /// out. A timeout is logged, not escalated; the funds usually arrive
    /// late rather than never.
    async fn track_bridge(
        &self,
        watch: &BridgeWatch,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FleetResult<()> {
        match self.monitor.watch(watch, shutdown).await? {
            BridgeOutcome::Completed { dest_tx, received } => {
                tracing::info!(
                    account = %self.account.label(),
                    received = %received,
                    dest_tx = ?dest_tx,
                    "bridge transfer settled"
                );
            }
            BridgeOutcome::TimedOut => {
                tracing::warn!(
                    account = %self.account.label(),
                    source_tx = %watch.source_tx,
                    "bridge transfer not observed within the watch window"
                );
            }
            BridgeOutcome::Cancelled => {}
        }
        Ok(())
    }
}
