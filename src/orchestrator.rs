// src/orchestrator.rs
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::chain::{ChainClient, RpcChainClient, backoff_delay};
use crate::config::{FleetConfig, NetworkConfig};
use crate::error::{FleetError, FleetResult};
use crate::pacing::sleep_cancellable;
use crate::quota::{MemoryQuotaStore, QuotaTracker};
use crate::scheduler::AccountScheduler;
use crate::types::Account;

/// Connection seam between the supervisor and the RPC layer, so restarts can
/// be exercised without a live endpoint.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        network: &NetworkConfig,
        account: &Account,
    ) -> FleetResult<Arc<dyn ChainClient>>;
}

struct RpcClientFactory {
    config: Arc<FleetConfig>,
}

#[async_trait]
impl ClientFactory for RpcClientFactory {
    async fn connect(
        &self,
        network: &NetworkConfig,
        account: &Account,
    ) -> FleetResult<Arc<dyn ChainClient>> {
        let client =
            RpcChainClient::connect(network, account.signer.clone(), &self.config.retry).await?;
        Ok(Arc::new(client))
    }
}

/// Bounded restart budget: at most `max_restarts` within a sliding `window`,
/// each restart preceded by an exponential backoff.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl RestartPolicy {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            max_restarts: config.retry.max_restarts_per_window,
            window: Duration::from_secs(config.retry.restart_window_secs),
            backoff_base_ms: config.retry.backoff_base_ms,
            backoff_cap_ms: config.retry.backoff_cap_ms,
        }
    }
}

/// Sliding-window restart bookkeeping for one supervised task.
struct RestartTracker {
    policy: RestartPolicy,
    history: Vec<Instant>,
}

impl RestartTracker {
    fn new(policy: RestartPolicy) -> Self {
        Self { policy, history: Vec::new() }
    }

    /// Register a failure. Returns the backoff to sleep before restarting,
    /// or None when the window budget is spent.
    fn next_restart(&mut self, now: Instant) -> Option<Duration> {
        let window = self.policy.window;
        self.history.retain(|at| now.duration_since(*at) < window);
        if self.history.len() as u32 >= self.policy.max_restarts {
            return None;
        }
        let attempt = self.history.len() as u32;
        self.history.push(now);
        Some(backoff_delay(attempt, self.policy.backoff_base_ms, self.policy.backoff_cap_ms))
    }
}

/// Spawns one supervised scheduler task per account and waits for all of
/// them to end, either on shutdown or on an exhausted restart budget.
pub struct FleetOrchestrator {
    config: Arc<FleetConfig>,
    accounts: Vec<Account>,
    factory: Arc<dyn ClientFactory>,
    policy: RestartPolicy,
    restarts: Arc<AtomicU32>,
}

impl FleetOrchestrator {
    pub fn new(config: FleetConfig, accounts: Vec<Account>) -> FleetResult<Self> {
        config.validate()?;
        if accounts.is_empty() {
            return Err(FleetError::Configuration("no accounts to run".to_string()));
        }
        let config = Arc::new(config);
        let factory = Arc::new(RpcClientFactory { config: config.clone() });
        let policy = RestartPolicy::from_config(&config);
        Ok(Self { config, accounts, factory, policy, restarts: Arc::new(AtomicU32::new(0)) })
    }

    #[cfg(test)]
    fn with_factory(
        config: FleetConfig,
        accounts: Vec<Account>,
        factory: Arc<dyn ClientFactory>,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            config: Arc::new(config),
            accounts,
            factory,
            policy,
            restarts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Total scheduler restarts across all accounts since startup.
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> FleetResult<()> {
        let quotas =
            Arc::new(QuotaTracker::new(MemoryQuotaStore::new(), self.config.actions.clone()));
        tracing::info!(accounts = self.accounts.len(), "starting fleet");

        let mut handles = Vec::with_capacity(self.accounts.len());
        for account in self.accounts.iter().cloned() {
            let label = account.label();
            let task = supervise(
                account,
                self.factory.clone(),
                quotas.clone(),
                self.config.clone(),
                self.policy.clone(),
                self.restarts.clone(),
                shutdown.clone(),
            );
            handles.push((label, tokio::spawn(task)));
        }

        for (label, handle) in handles {
            match handle.await {
                Ok(Ok(())) => tracing::info!(account = %label, "account task ended"),
                Ok(Err(e)) => {
                    tracing::error!(account = %label, error = %e, "account task gave up")
                }
                Err(e) => tracing::error!(account = %label, error = %e, "account task panicked"),
            }
        }

        tracing::info!(restarts = self.restart_count(), "fleet stopped");
        Ok(())
    }
}

/// Run one account's scheduler, restarting it under the policy when it exits
/// with a recoverable error. Fatal errors and spent budgets end the task.
async fn supervise(
    account: Account,
    factory: Arc<dyn ClientFactory>,
    quotas: Arc<QuotaTracker<MemoryQuotaStore>>,
    config: Arc<FleetConfig>,
    policy: RestartPolicy,
    restarts: Arc<AtomicU32>,
    mut shutdown: watch::Receiver<bool>,
) -> FleetResult<()> {
    let mut tracker = RestartTracker::new(policy);

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let error = match run_once(&account, &factory, &quotas, &config, shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if error.is_fatal() {
            return Err(error);
        }

        let Some(backoff) = tracker.next_restart(Instant::now()) else {
            return Err(FleetError::Connection(format!(
                "restart budget exhausted after {}",
                error
            )));
        };
        restarts.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            account = %account.label(),
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "scheduler exited, restarting"
        );
        if sleep_cancellable(backoff, &mut shutdown).await {
            return Ok(());
        }
    }
}

async fn run_once(
    account: &Account,
    factory: &Arc<dyn ClientFactory>,
    quotas: &Arc<QuotaTracker<MemoryQuotaStore>>,
    config: &Arc<FleetConfig>,
    shutdown: watch::Receiver<bool>,
) -> FleetResult<()> {
    let source = factory.connect(&config.networks.source, account).await?;
    let dest = factory.connect(&config.networks.destination, account).await?;
    let scheduler =
        AccountScheduler::new(account.clone(), source, dest, quotas.clone(), config.clone());
    let mut rng = StdRng::from_entropy();
    scheduler.run(&mut rng, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use std::sync::Mutex;

    const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_1: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn fast_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            window: Duration::from_secs(60),
            backoff_base_ms: 1,
            backoff_cap_ms: 4,
        }
    }

    fn fast_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.pacing = PacingConfig {
            inter_action_min_secs: 0,
            inter_action_max_secs: 0,
            inter_cycle_min_secs: 0,
            inter_cycle_max_secs: 0,
            low_balance_recheck_secs: 0,
            failure_pause_secs: 0,
        };
        config
    }

    /// Factory whose connections fail a scripted number of times.
    struct FlakyFactory {
        failures_left: Mutex<u32>,
        connects: AtomicU32,
    }

    impl FlakyFactory {
        fn failing(times: u32) -> Self {
            Self { failures_left: Mutex::new(times), connects: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl ClientFactory for FlakyFactory {
        async fn connect(
            &self,
            _network: &NetworkConfig,
            _account: &Account,
        ) -> FleetResult<Arc<dyn ChainClient>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(FleetError::Connection("refused".into()));
            }
            Err(FleetError::Configuration("no live client in this test".into()))
        }
    }

    #[test]
    fn test_restart_tracker_caps_window() {
        let mut tracker = RestartTracker::new(fast_policy(3));
        let now = Instant::now();

        assert!(tracker.next_restart(now).is_some());
        assert!(tracker.next_restart(now).is_some());
        assert!(tracker.next_restart(now).is_some());
        assert!(tracker.next_restart(now).is_none());

        // Outside the window the budget refills.
        let later = now + Duration::from_secs(61);
        assert!(tracker.next_restart(later).is_some());
    }

    #[test]
    fn test_restart_backoff_grows() {
        let mut tracker = RestartTracker::new(RestartPolicy {
            max_restarts: 4,
            window: Duration::from_secs(60),
            backoff_base_ms: 100,
            backoff_cap_ms: 300,
        });
        let now = Instant::now();

        assert_eq!(tracker.next_restart(now), Some(Duration::from_millis(100)));
        assert_eq!(tracker.next_restart(now), Some(Duration::from_millis(200)));
        assert_eq!(tracker.next_restart(now), Some(Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn test_supervisor_restarts_then_gives_up() {
        let account = Account::from_private_key(KEY_0, 0).unwrap();
        let factory = Arc::new(FlakyFactory::failing(u32::MAX));
        let orchestrator = FleetOrchestrator::with_factory(
            fast_config(),
            vec![account],
            factory.clone(),
            fast_policy(2),
        );
        let (_tx, shutdown) = watch::channel(false);

        orchestrator.run(shutdown).await.unwrap();

        // Initial attempt plus two restarts before the budget runs out.
        assert_eq!(orchestrator.restart_count(), 2);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_connect_error_skips_restart() {
        let account = Account::from_private_key(KEY_0, 0).unwrap();
        // Zero connection failures: the first connect surfaces the fatal
        // configuration error straight away.
        let factory = Arc::new(FlakyFactory::failing(0));
        let orchestrator = FleetOrchestrator::with_factory(
            fast_config(),
            vec![account],
            factory.clone(),
            fast_policy(5),
        );
        let (_tx, shutdown) = watch::channel(false);

        orchestrator.run(shutdown).await.unwrap();

        assert_eq!(orchestrator.restart_count(), 0);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_isolated_per_account() {
        let accounts = vec![
            Account::from_private_key(KEY_0, 0).unwrap(),
            Account::from_private_key(KEY_1, 1).unwrap(),
        ];
        let factory = Arc::new(FlakyFactory::failing(u32::MAX));
        let orchestrator = FleetOrchestrator::with_factory(
            fast_config(),
            accounts,
            factory.clone(),
            fast_policy(1),
        );
        let (_tx, shutdown) = watch::channel(false);

        orchestrator.run(shutdown).await.unwrap();

        // Each account burned its own restart budget independently.
        assert_eq!(orchestrator.restart_count(), 2);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rejects_empty_account_list() {
        let result = FleetOrchestrator::new(fast_config(), Vec::new());
        assert!(matches!(result, Err(FleetError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_exits_cleanly() {
        let account = Account::from_private_key(KEY_0, 0).unwrap();
        let factory = Arc::new(FlakyFactory::failing(u32::MAX));
        let orchestrator = FleetOrchestrator::with_factory(
            fast_config(),
            vec![account],
            factory,
            fast_policy(5),
        );
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        orchestrator.run(shutdown).await.unwrap();
        assert_eq!(orchestrator.restart_count(), 0);
    }
}
