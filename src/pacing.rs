// src/pacing.rs
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::PacingConfig;

/// Randomized delays between actions and between cycles.
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    config: PacingConfig,
}

impl PacingPolicy {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Uniform delay after each completed action.
    pub fn inter_action_delay(&self, rng: &mut impl Rng) -> Duration {
        uniform_secs(rng, self.config.inter_action_min_secs, self.config.inter_action_max_secs)
    }

    /// Uniform cooldown between full cycles.
    pub fn inter_cycle_delay(&self, rng: &mut impl Rng) -> Duration {
        uniform_secs(rng, self.config.inter_cycle_min_secs, self.config.inter_cycle_max_secs)
    }

    pub fn low_balance_recheck(&self) -> Duration {
        Duration::from_secs(self.config.low_balance_recheck_secs)
    }

    pub fn failure_pause(&self) -> Duration {
        Duration::from_secs(self.config.failure_pause_secs)
    }
}

fn uniform_secs(rng: &mut impl Rng, min: u64, max: u64) -> Duration {
    Duration::from_secs(rng.gen_range(min..=max))
}

/// Sleep that races the shutdown signal. Returns true if shutdown fired
/// before the delay elapsed.
pub async fn sleep_cancellable(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = sleep(duration) => false,
        result = shutdown.changed() => {
            // A closed channel means the sender is gone; treat as shutdown.
            result.is_err() || *shutdown.borrow()
        }
    }
}
