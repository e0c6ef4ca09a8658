//! Configuration management for the pairs trading bot.
//!
//! Loads settings from environment variables and config files.

use crate::market::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lending adapter wiring
    #[serde(default)]
    pub lending: LendingConfig,
    /// Pairs trading parameters
    #[serde(default)]
    pub bot: BotConfig,
    /// Swap execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// State persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Construction-time wiring for the lending adapter.
///
/// All addresses are immutable once the adapter is built; there is no
/// admin path to swap them at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingConfig {
    /// External lending market address
    #[serde(default = "default_pool_address")]
    pub pool_address: Address,
    /// Underlying asset accepted as collateral
    #[serde(default = "default_underlying_asset")]
    pub underlying_asset: Address,
    /// Service-provider address entitled to a fee on services rendered
    #[serde(default = "default_service_provider")]
    pub service_provider: Address,
    /// Service fee in basis points, skimmed from withdrawal proceeds.
    /// 0 means the provider address is purely informational.
    #[serde(default)]
    pub service_fee_bps: Decimal,
}

/// Pairs trading parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Neutral denomination asset capital is posted in
    #[serde(default = "default_underlying_asset")]
    pub denomination_asset: Address,
    /// Maximum allowed drift before a rebalance is required (fraction)
    #[serde(default = "default_neutrality_tolerance")]
    pub neutrality_tolerance: Decimal,
    /// Oracle quotes older than this are rejected
    #[serde(default = "default_price_freshness_secs")]
    pub price_freshness_secs: u64,
    /// Minimum capital to open a pair
    #[serde(default = "default_min_capital")]
    pub min_capital: Decimal,
    /// Minimum leg-value gap worth adjusting, to avoid dust trades
    #[serde(default = "default_min_rebalance_value")]
    pub min_rebalance_value: Decimal,
    /// Minimum accounting unit; all amounts round down to a multiple of it
    #[serde(default = "default_min_unit")]
    pub min_unit: Decimal,
}

/// Swap execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worst acceptable output shortfall on a swap (fraction)
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,
    /// Referral code forwarded to the lending market on deposits
    #[serde(default)]
    pub referral_code: u16,
}

/// State persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path for paper-trading state
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_pool_address() -> Address {
    Address::new("lending-pool")
}

fn default_underlying_asset() -> Address {
    Address::new("DAI")
}

fn default_service_provider() -> Address {
    Address::new("service-provider")
}

fn default_neutrality_tolerance() -> Decimal {
    dec!(0.01) // 1% drift triggers rebalance
}

fn default_price_freshness_secs() -> u64 {
    300
}

fn default_min_capital() -> Decimal {
    dec!(100)
}

fn default_min_rebalance_value() -> Decimal {
    dec!(1)
}

fn default_min_unit() -> Decimal {
    dec!(0.000001)
}

fn default_slippage_tolerance() -> Decimal {
    dec!(0.003) // 0.3%
}

fn default_db_path() -> String {
    "data/bot_state.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PTB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.bot.neutrality_tolerance > Decimal::ZERO
                && self.bot.neutrality_tolerance < Decimal::ONE,
            "neutrality_tolerance must be between 0 and 1"
        );

        anyhow::ensure!(
            self.execution.slippage_tolerance >= Decimal::ZERO
                && self.execution.slippage_tolerance < self.bot.neutrality_tolerance,
            "slippage_tolerance must be non-negative and below neutrality_tolerance"
        );

        anyhow::ensure!(
            self.bot.min_capital > Decimal::ZERO,
            "min_capital must be positive"
        );

        anyhow::ensure!(
            self.bot.price_freshness_secs > 0,
            "price_freshness_secs must be positive"
        );

        anyhow::ensure!(
            self.bot.min_unit > Decimal::ZERO && self.bot.min_unit <= Decimal::ONE,
            "min_unit must be between 0 and 1"
        );

        anyhow::ensure!(
            self.lending.service_fee_bps >= Decimal::ZERO
                && self.lending.service_fee_bps < dec!(10000),
            "service_fee_bps must be between 0 and 10000"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lending: LendingConfig::default(),
            bot: BotConfig::default(),
            execution: ExecutionConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for LendingConfig {
    fn default() -> Self {
        Self {
            pool_address: default_pool_address(),
            underlying_asset: default_underlying_asset(),
            service_provider: default_service_provider(),
            service_fee_bps: Decimal::ZERO,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            denomination_asset: default_underlying_asset(),
            neutrality_tolerance: default_neutrality_tolerance(),
            price_freshness_secs: default_price_freshness_secs(),
            min_capital: default_min_capital(),
            min_rebalance_value: default_min_rebalance_value(),
            min_unit: default_min_unit(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_tolerance: default_slippage_tolerance(),
            referral_code: 0,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
