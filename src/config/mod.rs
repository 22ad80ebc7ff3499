//! Configuration management for the symbol rotator.
//!
//! Loads settings from an optional config file and environment variables
//! (`ROTATOR__SECTION__FIELD`).

use crate::exchange::{Symbol, Venue};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange accounts, selected by exchange and account name
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeAccount>,
    /// Trading behaviour shared by all workers
    #[serde(default)]
    pub bot: BotConfig,
    /// Rotation controller cadence
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Per-symbol worker loop
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Market-data feed used for candidate selection
    #[serde(default)]
    pub api: ApiConfig,
    /// Paper trading and journal
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeAccount {
    /// Exchange name ("bybit")
    #[serde(default = "default_exchange_name")]
    pub name: String,
    #[serde(default = "default_account_name")]
    pub account_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub testnet: bool,
    /// Capacity: number of symbols traded concurrently
    #[serde(default = "default_symbols_allowed")]
    pub symbols_allowed: usize,
    /// REST endpoint override
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Symbols allowed to trade (empty = all)
    #[serde(default)]
    pub whitelist: Vec<Symbol>,
    /// Symbols never traded
    #[serde(default)]
    pub blacklist: Vec<Symbol>,
    /// Ceiling on the value of one minimum-size order, in USDT
    #[serde(default = "default_max_usd_value")]
    pub max_usd_value: Decimal,
    /// Fraction of equity committed per entry (0.0-1.0)
    #[serde(default = "default_wallet_exposure")]
    pub wallet_exposure: Decimal,
    /// Minimum 1m volume to enter
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    /// Minimum 5m spread (percent) to enter
    #[serde(default = "default_min_distance")]
    pub min_distance: Decimal,
    #[serde(default = "default_true")]
    pub long_mode: bool,
    #[serde(default = "default_true")]
    pub short_mode: bool,
    /// Write the per-symbol dashboard snapshot
    #[serde(default)]
    pub dashboard_enabled: bool,
    /// Directory holding `shared_data.json`
    #[serde(default = "default_shared_data_path")]
    pub shared_data_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// How often the candidate list is refreshed
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Dwell time after which an idle symbol may be rotated out
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold_secs: u64,
    /// How long a retired worker is waited on
    #[serde(default = "default_retire_grace")]
    pub retire_grace_secs: u64,
    #[serde(default = "default_max_rotations_per_tick")]
    pub max_rotations_per_tick: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between worker iterations
    #[serde(default = "default_worker_interval")]
    pub interval_secs: u64,
    /// Attempts per exchange call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Minimum age before a drifted take-profit is replaced
    #[serde(default = "default_tp_refresh")]
    pub tp_refresh_secs: u64,
    /// Age after which an unfilled entry order is cancelled
    #[serde(default = "default_entry_timeout")]
    pub entry_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    Remote,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_feed_mode")]
    pub mode: FeedMode,
    /// Feed URL in remote mode
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Feed file in local mode
    #[serde(default = "default_feed_filename")]
    pub filename: String,
    /// How long a fetched feed is reused
    #[serde(default = "default_cache_secs")]
    pub cache_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// SQLite journal of rotation events and orders
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
}

fn default_exchanges() -> Vec<ExchangeAccount> {
    vec![ExchangeAccount::default()]
}

fn default_exchange_name() -> String {
    "bybit".to_string()
}

fn default_account_name() -> String {
    "account_1".to_string()
}

fn default_symbols_allowed() -> usize {
    5
}

fn default_max_usd_value() -> Decimal {
    Decimal::new(50, 0)
}

fn default_wallet_exposure() -> Decimal {
    Decimal::new(1, 3) // 0.001 (0.1%)
}

fn default_min_volume() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_min_distance() -> Decimal {
    Decimal::new(15, 2) // 0.15%
}

fn default_true() -> bool {
    true
}

fn default_shared_data_path() -> String {
    "data".to_string()
}

fn default_tick_interval() -> u64 {
    15
}

fn default_refresh_interval() -> u64 {
    50
}

fn default_rotation_threshold() -> u64 {
    30
}

fn default_retire_grace() -> u64 {
    10
}

fn default_max_rotations_per_tick() -> usize {
    1
}

fn default_worker_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_tp_refresh() -> u64 {
    300
}

fn default_entry_timeout() -> u64 {
    60
}

fn default_feed_mode() -> FeedMode {
    FeedMode::Remote
}

fn default_feed_url() -> String {
    "http://api.tradesimple.xyz/data/quantdatav2_bybit.json".to_string()
}

fn default_feed_filename() -> String {
    "data/quantdata.json".to_string()
}

fn default_cache_secs() -> u64 {
    30
}

fn default_initial_balance() -> Decimal {
    Decimal::new(10000, 0)
}

fn default_journal_path() -> String {
    "data/rotator.db".to_string()
}

impl Config {
    /// Load configuration from `config.toml` (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from the given file (extension optional).
    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::default().separator("__").prefix("ROTATOR"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Find the account entry for an exchange and account name.
    pub fn account(&self, exchange: &str, account_name: &str) -> Result<&ExchangeAccount> {
        self.exchanges
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(exchange) && a.account_name == account_name)
            .with_context(|| {
                format!(
                    "No account '{}' configured for exchange '{}'",
                    account_name, exchange
                )
            })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.exchanges.is_empty(), "at least one exchange account is required");

        for account in &self.exchanges {
            anyhow::ensure!(
                account.symbols_allowed >= 1,
                "symbols_allowed must be >= 1 for account '{}'",
                account.account_name
            );
            account
                .name
                .parse::<Venue>()
                .with_context(|| format!("account '{}'", account.account_name))?;
        }

        anyhow::ensure!(
            self.bot.wallet_exposure > Decimal::ZERO && self.bot.wallet_exposure <= Decimal::ONE,
            "wallet_exposure must be between 0 and 1"
        );

        anyhow::ensure!(
            self.rotation.tick_interval_secs > 0
                && self.rotation.refresh_interval_secs > 0
                && self.worker.interval_secs > 0,
            "tick, refresh and worker intervals must be positive"
        );

        anyhow::ensure!(
            self.rotation.retire_grace_secs < self.rotation.tick_interval_secs,
            "retire_grace_secs must be shorter than tick_interval_secs"
        );

        anyhow::ensure!(
            self.rotation.max_rotations_per_tick >= 1,
            "max_rotations_per_tick must be >= 1"
        );

        Ok(())
    }
}

impl RotationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn rotation_threshold(&self) -> Duration {
        Duration::from_secs(self.rotation_threshold_secs)
    }

    pub fn retire_grace(&self) -> Duration {
        Duration::from_secs(self.retire_grace_secs)
    }
}

impl WorkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: default_exchanges(),
            bot: BotConfig::default(),
            rotation: RotationConfig::default(),
            worker: WorkerConfig::default(),
            api: ApiConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

impl Default for ExchangeAccount {
    fn default() -> Self {
        Self {
            name: default_exchange_name(),
            account_name: default_account_name(),
            api_key: String::new(),
            api_secret: String::new(),
            testnet: true,
            symbols_allowed: default_symbols_allowed(),
            base_url: None,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            max_usd_value: default_max_usd_value(),
            wallet_exposure: default_wallet_exposure(),
            min_volume: default_min_volume(),
            min_distance: default_min_distance(),
            long_mode: true,
            short_mode: true,
            dashboard_enabled: false,
            shared_data_path: default_shared_data_path(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            refresh_interval_secs: default_refresh_interval(),
            rotation_threshold_secs: default_rotation_threshold(),
            retire_grace_secs: default_retire_grace(),
            max_rotations_per_tick: default_max_rotations_per_tick(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_worker_interval(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            tp_refresh_secs: default_tp_refresh(),
            entry_timeout_secs: default_entry_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mode: default_feed_mode(),
            url: default_feed_url(),
            filename: default_feed_filename(),
            cache_secs: default_cache_secs(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            journal_path: default_journal_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_grace_must_be_shorter_than_tick() {
        let mut config = Config::default();
        config.rotation.retire_grace_secs = config.rotation.tick_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut config = Config::default();
        config.exchanges[0].symbols_allowed = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_normalizes_lists() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[exchanges]]
name = "bybit"
account_name = "main"
symbols_allowed = 3

[bot]
whitelist = ["BTC/USDT:USDT", "ethusdt"]
blacklist = ["DOGEUSDT"]

[rotation]
rotation_threshold_secs = 60
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let config = Config::load_from(path).unwrap();

        assert_eq!(config.exchanges.len(), 1);
        assert_eq!(config.account("Bybit", "main").unwrap().symbols_allowed, 3);
        assert!(config.account("bybit", "other").is_err());
        assert_eq!(config.bot.whitelist, vec![Symbol::new("BTCUSDT"), Symbol::new("ETHUSDT")]);
        assert_eq!(config.rotation.rotation_threshold_secs, 60);
        assert_eq!(config.rotation.tick_interval_secs, 15);
        assert!(config.validate().is_ok());
    }
}
