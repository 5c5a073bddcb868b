use std::time::Duration;

use core_types::{retry::RetryPolicy, types::Amount};

pub const DEFAULT_ESCROW_TIMEOUT: Duration = Duration::from_secs(7 * 86_400);
pub const DEFAULT_NAME_CHANGE_COOLDOWN: Duration = Duration::from_secs(30 * 86_400);
pub const DEFAULT_MIN_TOPUP: Amount = 100;

/// Upper bound on any single amount; keeps balance arithmetic far from
/// overflow territory.
pub const MAX_AMOUNT: Amount = 1_000_000_000_000;

#[derive(Clone)]
pub struct LedgerConfig {
    pub escrow_timeout: Duration,
    pub name_change_cooldown: Duration,
    pub min_topup: Amount,
    pub retry: RetryPolicy,
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self {
            escrow_timeout: DEFAULT_ESCROW_TIMEOUT,
            name_change_cooldown: DEFAULT_NAME_CHANGE_COOLDOWN,
            min_topup: DEFAULT_MIN_TOPUP,
            retry: RetryPolicy::default_store(),
        }
    }

    pub fn with_escrow_timeout(mut self, timeout: Duration) -> Self {
        self.escrow_timeout = timeout;
        self
    }

    pub fn with_name_change_cooldown(mut self, cooldown: Duration) -> Self {
        self.name_change_cooldown = cooldown;
        self
    }

    pub fn with_min_topup(mut self, min_topup: Amount) -> Self {
        self.min_topup = min_topup.clamp(1, MAX_AMOUNT);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_min_topup() {
        let config = LedgerConfig::new().with_min_topup(0);
        assert_eq!(config.min_topup, 1);
        let config = LedgerConfig::new().with_min_topup(MAX_AMOUNT + 1);
        assert_eq!(config.min_topup, MAX_AMOUNT);
    }
}
