//! Collaborator traits for the external lending market, swap venue, and
//! price oracle.
//!
//! Implement these traits to wire the bot to a real venue. The in-process
//! mocks in [`super::mock`] implement the same traits for paper trading
//! and tests.

use crate::error::ServiceError;
use crate::market::types::{Address, PriceQuote, ReserveData};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// The external lending market the adapter deposits into.
#[async_trait]
pub trait LendingMarket: Send + Sync {
    /// Pull `amount` of `asset` from the caller and credit `on_behalf_of`'s
    /// receipt balance.
    async fn supply(
        &self,
        asset: &Address,
        amount: Decimal,
        on_behalf_of: &Address,
        referral_code: u16,
    ) -> Result<(), ServiceError>;

    /// Redeem up to `amount` of `asset` to `to`.
    ///
    /// Returns the amount actually transferred, which may differ from the
    /// request near full withdrawal because of the market's own rounding.
    async fn withdraw(
        &self,
        asset: &Address,
        amount: Decimal,
        to: &Address,
    ) -> Result<Decimal, ServiceError>;

    /// Reserve metadata for `asset` (receipt token address, ...).
    async fn reserve_data(&self, asset: &Address) -> Result<ReserveData, ServiceError>;
}

/// The external swap venue used to enter and exit legs.
///
/// Routing internals stay on the venue side; the bot only sees the single
/// atomic swap primitive.
#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Swap `amount_in` of `asset_in` for `asset_out`.
    ///
    /// Fails with [`ServiceError::SlippageExceeded`] when the output would
    /// fall below `min_amount_out`.
    async fn swap(
        &self,
        asset_in: &Address,
        asset_out: &Address,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<Decimal, ServiceError>;
}

/// Price oracle for all assets the bot trades.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest observation for `asset`, denominated in the neutral asset.
    async fn price(&self, asset: &Address) -> Result<PriceQuote, ServiceError>;
}
