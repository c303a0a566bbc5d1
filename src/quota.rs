// src/quota.rs
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use alloy::primitives::Address;

use crate::config::ActionsConfig;
use crate::error::FleetResult;
use crate::types::ActionKind;

/// Durable counter boundary: (account, kind) -> completions since last reset.
///
/// The orchestrator gives each account its own tracker, so the store sees a
/// single writer per account; locking here is defense in depth, not the
/// correctness mechanism.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn count(&self, account: Address, kind: ActionKind) -> FleetResult<u32>;
    /// Increment and return the new count, atomically per key.
    async fn increment(&self, account: Address, kind: ActionKind) -> FleetResult<u32>;
    /// Drop all of the account's counters and stamp the reset time.
    async fn reset_account(&self, account: Address) -> FleetResult<()>;
}

/// In-memory store used in production runs and tests alike.
#[derive(Default)]
pub struct MemoryQuotaStore {
    counts: RwLock<HashMap<(Address, ActionKind), u32>>,
    reset_at: RwLock<HashMap<Address, chrono::DateTime<chrono::Utc>>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_reset(&self, account: Address) -> Option<chrono::DateTime<chrono::Utc>> {
        self.reset_at.read().await.get(&account).copied()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn count(&self, account: Address, kind: ActionKind) -> FleetResult<u32> {
        Ok(*self.counts.read().await.get(&(account, kind)).unwrap_or(&0))
    }

    async fn increment(&self, account: Address, kind: ActionKind) -> FleetResult<u32> {
        let mut counts = self.counts.write().await;
        let entry = counts.entry((account, kind)).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn reset_account(&self, account: Address) -> FleetResult<()> {
        let mut counts = self.counts.write().await;
        counts.retain(|(addr, _), _| *addr != account);
        drop(counts);
        self.reset_at.write().await.insert(account, chrono::Utc::now());
        Ok(())
    }
}

/// Per-account daily allowance tracking over a pluggable store.
pub struct QuotaTracker<S: QuotaStore> {
    store: S,
    actions: ActionsConfig,
}

impl<S: QuotaStore> QuotaTracker<S> {
    pub fn new(store: S, actions: ActionsConfig) -> Self {
        Self { store, actions }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Remaining allowance for a kind: configured quota minus completions
    /// since the last reset, never negative.
    pub async fn remaining(&self, account: Address, kind: ActionKind) -> FleetResult<u32> {
        let quota = self.actions.daily_count(kind);
        let used = self.store.count(account, kind).await?;
        Ok(quota.saturating_sub(used))
    }

    /// Record one completed action. Callers must not plan beyond
    /// `remaining`, so the new count never exceeds the quota.
    pub async fn record_completion(&self, account: Address, kind: ActionKind) -> FleetResult<()> {
        let count = self.store.increment(account, kind).await?;
        tracing::debug!(%account, %kind, count, "recorded completion");
        Ok(())
    }

    /// Zero all kind counters for the account. Called exactly once per
    /// scheduling cycle, at the cooldown boundary.
    pub async fn reset_daily(&self, account: Address) -> FleetResult<()> {
        self.store.reset_account(account).await?;
        tracing::debug!(%account, "daily quota reset");
        Ok(())
    }
}
