use std::str::FromStr;

use config::Config;
use serde::{Deserialize, Serialize};

pub use config::ConfigError;

/// Deployment target for the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(ConfigError::Message(format!(
                "unknown environment '{other}' (expected 'dev' or 'prod')"
            ))),
        }
    }
}

impl Environment {
    pub fn label(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    fn default_state_dir(&self) -> &'static str {
        match self {
            Environment::Dev => "storefront.state",
            Environment::Prod => "/var/lib/storefrontd",
        }
    }
}

/// Daemon configuration: file (`storefront.toml`) plus `STOREFRONT_*`
/// environment overrides, with per-environment fallbacks applied after load.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub state_dir: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub notify: NotifySettings,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9464".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            snapshot_file: default_snapshot_file(),
        }
    }
}

fn default_snapshot_file() -> String {
    "store.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_escrow_timeout_days")]
    pub escrow_timeout_days: u64,
    #[serde(default = "default_name_change_cooldown_days")]
    pub name_change_cooldown_days: u64,
    #[serde(default = "default_min_topup")]
    pub min_topup: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            escrow_timeout_days: default_escrow_timeout_days(),
            name_change_cooldown_days: default_name_change_cooldown_days(),
            min_topup: default_min_topup(),
        }
    }
}

fn default_escrow_timeout_days() -> u64 {
    7
}

fn default_name_change_cooldown_days() -> u64 {
    30
}

fn default_min_topup() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    #[serde(default = "default_sweep_poll_secs")]
    pub poll_interval_s: u64,
    #[serde(default = "default_sweep_max_trades")]
    pub max_trades_per_cycle: usize,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            poll_interval_s: default_sweep_poll_secs(),
            max_trades_per_cycle: default_sweep_max_trades(),
        }
    }
}

fn default_sweep_poll_secs() -> u64 {
    300
}

fn default_sweep_max_trades() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifySettings {
    /// Operator webhook for ledger events; notifications stay store-only
    /// when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl AppConfig {
    pub fn load(env: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("storefront").required(false))
            .add_source(config::Environment::with_prefix("STOREFRONT").separator("__"))
            .build()?;
        let mut config: Self = settings.try_deserialize()?;
        if config.state_dir.is_empty() {
            config.state_dir = env.default_state_dir().to_string();
        }
        if config.ledger.min_topup == 0 {
            return Err(ConfigError::Message(
                "ledger.min_topup must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!(Environment::from_str("DEV").unwrap(), Environment::Dev);
        assert_eq!(Environment::from_str("prod").unwrap(), Environment::Prod);
        assert!(Environment::from_str("staging").is_err());
    }

    #[test]
    fn defaults_fill_unset_sections() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.metrics_addr, "127.0.0.1:9464");
        assert_eq!(config.store.snapshot_file, "store.json");
        assert_eq!(config.ledger.escrow_timeout_days, 7);
        assert_eq!(config.ledger.name_change_cooldown_days, 30);
        assert_eq!(config.ledger.min_topup, 100);
        assert_eq!(config.sweep.poll_interval_s, 300);
        assert!(config.notify.webhook_url.is_none());
    }
}
