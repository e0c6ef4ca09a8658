//! In-memory mock collaborators for paper trading and tests.
//!
//! The mocks model just enough venue behavior to exercise the adapter and
//! bot invariants: token balances and allowances, receipt minting and
//! yield accrual, withdrawal rounding, swap pricing with a configurable
//! execution penalty, and failure injection for partial-unwind scenarios.

use crate::error::ServiceError;
use crate::market::traits::{LendingMarket, PriceOracle, SwapVenue};
use crate::market::types::{Address, PriceQuote, ReserveData};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Ledger state of the mock lending market.
#[derive(Debug, Default)]
struct LendingMarketState {
    /// Wallet balances: owner -> asset -> amount
    wallets: HashMap<Address, HashMap<Address, Decimal>>,
    /// Spending approvals granted to the market: (owner, asset) -> amount
    allowances: HashMap<(Address, Address), Decimal>,
    /// Receipt-token balances: account -> amount
    receipts: HashMap<Address, Decimal>,
    /// Reserve metadata: asset -> data
    reserves: HashMap<Address, ReserveData>,
}

/// Mock lending market with balance/allowance checks and receipt minting.
pub struct MockLendingMarket {
    state: Arc<RwLock<LendingMarketState>>,
    /// Amount shaved off a full withdrawal to simulate market-side rounding
    withdraw_shave: RwLock<Decimal>,
    /// When set, the next supply call fails and the flag resets
    fail_next_supply: RwLock<bool>,
    /// When set, the next withdraw call fails and the flag resets
    fail_next_withdraw: RwLock<bool>,
}

impl MockLendingMarket {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LendingMarketState::default())),
            withdraw_shave: RwLock::new(Decimal::ZERO),
            fail_next_supply: RwLock::new(false),
            fail_next_withdraw: RwLock::new(false),
        }
    }

    /// Seed a wallet balance.
    pub async fn set_balance(&self, owner: &Address, asset: &Address, amount: Decimal) {
        let mut state = self.state.write().await;
        state
            .wallets
            .entry(owner.clone())
            .or_default()
            .insert(asset.clone(), amount);
    }

    /// Approve the market to pull `amount` of `asset` from `owner`.
    pub async fn approve(&self, owner: &Address, asset: &Address, amount: Decimal) {
        let mut state = self.state.write().await;
        state
            .allowances
            .insert((owner.clone(), asset.clone()), amount);
    }

    /// Register reserve metadata for an asset.
    pub async fn set_reserve(&self, asset: &Address, receipt_token: Address) {
        let mut state = self.state.write().await;
        state
            .reserves
            .insert(asset.clone(), ReserveData { receipt_token });
    }

    /// Accrue yield on an account's receipt balance (monotonic growth).
    pub async fn accrue_yield(&self, account: &Address, amount: Decimal) {
        let mut state = self.state.write().await;
        *state.receipts.entry(account.clone()).or_default() += amount;
    }

    /// Live receipt-token balance of an account.
    pub async fn receipt_balance(&self, account: &Address) -> Decimal {
        let state = self.state.read().await;
        state.receipts.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    /// Wallet balance of an owner for an asset.
    pub async fn wallet_balance(&self, owner: &Address, asset: &Address) -> Decimal {
        let state = self.state.read().await;
        state
            .wallets
            .get(owner)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Shave this much off full withdrawals (simulates market rounding).
    pub async fn set_withdraw_shave(&self, shave: Decimal) {
        *self.withdraw_shave.write().await = shave;
    }

    /// Make the next supply call fail with an underlying-market error.
    pub async fn fail_next_supply(&self) {
        *self.fail_next_supply.write().await = true;
    }

    /// Make the next withdraw call fail with an underlying-market error.
    pub async fn fail_next_withdraw(&self) {
        *self.fail_next_withdraw.write().await = true;
    }
}

impl Default for MockLendingMarket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LendingMarket for MockLendingMarket {
    async fn supply(
        &self,
        asset: &Address,
        amount: Decimal,
        on_behalf_of: &Address,
        referral_code: u16,
    ) -> Result<(), ServiceError> {
        {
            let mut fail = self.fail_next_supply.write().await;
            if *fail {
                *fail = false;
                return Err(ServiceError::UnderlyingMarket(
                    "injected supply failure".to_string(),
                ));
            }
        }

        let mut state = self.state.write().await;

        let allowance_key = (on_behalf_of.clone(), asset.clone());
        let allowance = state
            .allowances
            .get(&allowance_key)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if allowance < amount {
            return Err(ServiceError::InsufficientAllowance {
                owner: on_behalf_of.clone(),
                available: allowance,
                requested: amount,
            });
        }

        let balance = state
            .wallets
            .get(on_behalf_of)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(Decimal::ZERO);
        if balance < amount {
            return Err(ServiceError::InsufficientBalance {
                account: on_behalf_of.clone(),
                available: balance,
                requested: amount,
            });
        }

        // Pull the underlying, burn the allowance, mint receipts 1:1.
        state.allowances.insert(allowance_key, allowance - amount);
        if let Some(assets) = state.wallets.get_mut(on_behalf_of) {
            if let Some(bal) = assets.get_mut(asset) {
                *bal -= amount;
            }
        }
        *state.receipts.entry(on_behalf_of.clone()).or_default() += amount;

        debug!(%asset, %amount, account = %on_behalf_of, referral_code, "mock supply");
        Ok(())
    }

    async fn withdraw(
        &self,
        asset: &Address,
        amount: Decimal,
        to: &Address,
    ) -> Result<Decimal, ServiceError> {
        {
            let mut fail = self.fail_next_withdraw.write().await;
            if *fail {
                *fail = false;
                return Err(ServiceError::UnderlyingMarket(
                    "injected withdraw failure".to_string(),
                ));
            }
        }

        let shave = *self.withdraw_shave.read().await;
        let mut state = self.state.write().await;

        let receipt = state.receipts.get(to).copied().unwrap_or(Decimal::ZERO);
        if receipt <= Decimal::ZERO {
            return Err(ServiceError::UnderlyingMarket(format!(
                "no receipt balance for {to}"
            )));
        }

        // Full (or over-full) withdrawals hit the market's own rounding.
        let actual = if amount >= receipt {
            (receipt - shave).max(Decimal::ZERO)
        } else {
            amount
        };

        *state.receipts.entry(to.clone()).or_default() = receipt - actual;
        *state
            .wallets
            .entry(to.clone())
            .or_default()
            .entry(asset.clone())
            .or_default() += actual;

        debug!(%asset, requested = %amount, %actual, %to, "mock withdraw");
        Ok(actual)
    }

    async fn reserve_data(&self, asset: &Address) -> Result<ReserveData, ServiceError> {
        let state = self.state.read().await;
        if let Some(data) = state.reserves.get(asset) {
            return Ok(data.clone());
        }
        // Unregistered reserves get a synthesized receipt address so tests
        // don't have to wire every asset explicitly.
        Ok(ReserveData {
            receipt_token: Address::new(format!("a{asset}")),
        })
    }
}

/// One executed swap, recorded for assertions.
#[derive(Debug, Clone)]
pub struct SwapFill {
    pub asset_in: Address,
    pub asset_out: Address,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
}

/// Mock swap venue pricing against a static table.
pub struct MockSwapVenue {
    prices: Arc<RwLock<HashMap<Address, Decimal>>>,
    fills: Arc<RwLock<Vec<SwapFill>>>,
    /// Fraction of output lost to execution (spread + impact), e.g. 0.001
    execution_penalty: RwLock<Decimal>,
    /// When set, the next swap call fails and the flag resets
    fail_next_swap: RwLock<bool>,
}

impl MockSwapVenue {
    pub fn new() -> Self {
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
            fills: Arc::new(RwLock::new(Vec::new())),
            execution_penalty: RwLock::new(Decimal::ZERO),
            fail_next_swap: RwLock::new(false),
        }
    }

    /// Set the venue-side price of an asset in denomination units.
    pub async fn set_price(&self, asset: &Address, price: Decimal) {
        self.prices.write().await.insert(asset.clone(), price);
    }

    /// Lose this fraction of every swap's output to execution.
    pub async fn set_execution_penalty(&self, penalty: Decimal) {
        *self.execution_penalty.write().await = penalty;
    }

    /// Make the next swap call fail with an underlying-market error.
    pub async fn fail_next_swap(&self) {
        *self.fail_next_swap.write().await = true;
    }

    /// Executed swaps, oldest first.
    pub async fn fills(&self) -> Vec<SwapFill> {
        self.fills.read().await.clone()
    }
}

impl Default for MockSwapVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapVenue for MockSwapVenue {
    async fn swap(
        &self,
        asset_in: &Address,
        asset_out: &Address,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<Decimal, ServiceError> {
        {
            let mut fail = self.fail_next_swap.write().await;
            if *fail {
                *fail = false;
                return Err(ServiceError::UnderlyingMarket(
                    "injected swap failure".to_string(),
                ));
            }
        }

        let prices = self.prices.read().await;
        let price_in = prices.get(asset_in).copied().ok_or_else(|| {
            ServiceError::UnderlyingMarket(format!("no venue price for {asset_in}"))
        })?;
        let price_out = prices.get(asset_out).copied().ok_or_else(|| {
            ServiceError::UnderlyingMarket(format!("no venue price for {asset_out}"))
        })?;
        drop(prices);

        let penalty = *self.execution_penalty.read().await;
        let amount_out = amount_in * price_in / price_out * (Decimal::ONE - penalty);

        if amount_out < min_amount_out {
            return Err(ServiceError::SlippageExceeded {
                amount_out,
                min_amount_out,
            });
        }

        self.fills.write().await.push(SwapFill {
            asset_in: asset_in.clone(),
            asset_out: asset_out.clone(),
            amount_in,
            amount_out,
        });

        debug!(%asset_in, %asset_out, %amount_in, %amount_out, "mock swap");
        Ok(amount_out)
    }
}

/// Mock price oracle backed by a quote table.
pub struct MockPriceOracle {
    quotes: Arc<RwLock<HashMap<Address, PriceQuote>>>,
}

impl MockPriceOracle {
    pub fn new() -> Self {
        Self {
            quotes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a price observed now.
    pub async fn set_price(&self, asset: &Address, value: Decimal) {
        self.set_quote(asset, value, Utc::now()).await;
    }

    /// Publish a price with an explicit observation time.
    pub async fn set_quote(&self, asset: &Address, value: Decimal, timestamp: DateTime<Utc>) {
        self.quotes
            .write()
            .await
            .insert(asset.clone(), PriceQuote::new(value, timestamp));
    }
}

impl Default for MockPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for MockPriceOracle {
    async fn price(&self, asset: &Address) -> Result<PriceQuote, ServiceError> {
        self.quotes
            .read()
            .await
            .get(asset)
            .copied()
            .ok_or_else(|| ServiceError::UnderlyingMarket(format!("no oracle price for {asset}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[tokio::test]
    async fn test_supply_requires_allowance_then_balance() {
        let market = MockLendingMarket::new();
        let (alice, snx) = (addr("alice"), addr("SNX"));

        let err = market.supply(&snx, dec!(10), &alice, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientAllowance { .. }));

        market.approve(&alice, &snx, dec!(10)).await;
        let err = market.supply(&snx, dec!(10), &alice, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientBalance { .. }));

        market.set_balance(&alice, &snx, dec!(10)).await;
        market.supply(&snx, dec!(10), &alice, 0).await.unwrap();
        assert_eq!(market.receipt_balance(&alice).await, dec!(10));
        assert_eq!(market.wallet_balance(&alice, &snx).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_full_withdraw_is_shaved() {
        let market = MockLendingMarket::new();
        let (alice, snx) = (addr("alice"), addr("SNX"));
        market.approve(&alice, &snx, dec!(100)).await;
        market.set_balance(&alice, &snx, dec!(100)).await;
        market.supply(&snx, dec!(100), &alice, 0).await.unwrap();
        market.set_withdraw_shave(dec!(0.000001)).await;

        let actual = market.withdraw(&snx, dec!(100), &alice).await.unwrap();
        assert_eq!(actual, dec!(99.999999));
        assert_eq!(market.receipt_balance(&alice).await, dec!(0.000001));
    }

    #[tokio::test]
    async fn test_swap_respects_min_amount_out() {
        let venue = MockSwapVenue::new();
        let (dai, snx) = (addr("DAI"), addr("SNX"));
        venue.set_price(&dai, dec!(1)).await;
        venue.set_price(&snx, dec!(2)).await;

        // 100 DAI -> 50 SNX at par
        let out = venue.swap(&dai, &snx, dec!(100), dec!(50)).await.unwrap();
        assert_eq!(out, dec!(50));

        venue.set_execution_penalty(dec!(0.01)).await;
        let err = venue.swap(&dai, &snx, dec!(100), dec!(50)).await.unwrap_err();
        assert!(matches!(err, ServiceError::SlippageExceeded { .. }));
    }

    #[tokio::test]
    async fn test_oracle_quotes() {
        let oracle = MockPriceOracle::new();
        let snx = addr("SNX");
        oracle.set_price(&snx, dec!(2)).await;

        let quote = oracle.price(&snx).await.unwrap();
        assert_eq!(quote.value, dec!(2));
        assert!(quote.age_secs(Utc::now()) < 5);

        let err = oracle.price(&addr("LINK")).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnderlyingMarket(_)));
    }
}
