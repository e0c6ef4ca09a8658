//! Short-leg synthesis.
//!
//! How the short side of a pair is put on depends on the external market:
//! borrow-and-sell against posted collateral, a native short instrument,
//! an inverse token. The engine only needs two operations — open short
//! exposure, buy it back — so the mechanism is a strategy trait chosen at
//! construction.

use crate::error::ServiceError;
use crate::market::{Address, SwapVenue};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of a short buy-back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShortFill {
    /// Denomination units spent on the buy-back
    pub spent: Decimal,
    /// Quantity of the shorted asset actually repaid (at least the
    /// requested quantity; more when the spend bought back extra)
    pub repaid: Decimal,
}

/// Mechanism for opening and unwinding short exposure.
#[async_trait]
pub trait ShortLegStrategy: Send + Sync {
    /// Short `quantity` of `asset`, returning the denomination proceeds.
    ///
    /// Fails with `SlippageExceeded` when proceeds would fall below
    /// `min_proceeds`.
    async fn open_short(
        &self,
        asset: &Address,
        quantity: Decimal,
        min_proceeds: Decimal,
    ) -> Result<Decimal, ServiceError>;

    /// Buy back at least `quantity` of `asset`, spending up to `max_spend`
    /// denomination units.
    ///
    /// The returned `repaid` quantity is authoritative: callers must
    /// reduce their own short bookkeeping by exactly that amount so the
    /// two books never drift apart.
    async fn close_short(
        &self,
        asset: &Address,
        quantity: Decimal,
        max_spend: Decimal,
    ) -> Result<ShortFill, ServiceError>;
}

/// Default mechanism: borrow the short asset against the posted
/// collateral, sell it to the denomination asset on the venue, and buy it
/// back to repay when the leg is reduced or closed.
pub struct BorrowAgainstCollateral {
    venue: Arc<dyn SwapVenue>,
    denomination: Address,
    /// Outstanding borrowed quantity per asset
    borrowed: RwLock<HashMap<Address, Decimal>>,
}

impl BorrowAgainstCollateral {
    pub fn new(venue: Arc<dyn SwapVenue>, denomination: Address) -> Self {
        Self {
            venue,
            denomination,
            borrowed: RwLock::new(HashMap::new()),
        }
    }

    /// Outstanding borrow for an asset (test/inspection hook).
    pub async fn outstanding(&self, asset: &Address) -> Decimal {
        self.borrowed
            .read()
            .await
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl ShortLegStrategy for BorrowAgainstCollateral {
    async fn open_short(
        &self,
        asset: &Address,
        quantity: Decimal,
        min_proceeds: Decimal,
    ) -> Result<Decimal, ServiceError> {
        // Sell the borrowed asset for the denomination asset. The borrow
        // is recorded only once the sale has gone through.
        let proceeds = self
            .venue
            .swap(asset, &self.denomination, quantity, min_proceeds)
            .await?;

        let mut borrowed = self.borrowed.write().await;
        *borrowed.entry(asset.clone()).or_default() += quantity;

        debug!(%asset, %quantity, %proceeds, "Short leg opened");
        Ok(proceeds)
    }

    async fn close_short(
        &self,
        asset: &Address,
        quantity: Decimal,
        max_spend: Decimal,
    ) -> Result<ShortFill, ServiceError> {
        // Exact-out is approximated by spending the budget and requiring
        // at least `quantity` back; any excess shrinks the borrow further.
        let bought = self
            .venue
            .swap(&self.denomination, asset, max_spend, quantity)
            .await?;

        let mut borrowed = self.borrowed.write().await;
        let entry = borrowed.entry(asset.clone()).or_default();
        *entry = (*entry - bought).max(Decimal::ZERO);

        debug!(%asset, %quantity, %bought, spent = %max_spend, "Short leg reduced");
        Ok(ShortFill {
            spent: max_spend,
            repaid: bought,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MockSwapVenue;
    use rust_decimal_macros::dec;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    async fn strategy_with_prices() -> (Arc<MockSwapVenue>, BorrowAgainstCollateral) {
        let venue = Arc::new(MockSwapVenue::new());
        venue.set_price(&addr("DAI"), dec!(1)).await;
        venue.set_price(&addr("LINK"), dec!(1)).await;
        let strategy = BorrowAgainstCollateral::new(venue.clone(), addr("DAI"));
        (venue, strategy)
    }

    #[tokio::test]
    async fn test_open_short_sells_and_records_borrow() {
        let (_, strategy) = strategy_with_prices().await;
        let link = addr("LINK");

        let proceeds = strategy.open_short(&link, dec!(50), dec!(49)).await.unwrap();
        assert_eq!(proceeds, dec!(50));
        assert_eq!(strategy.outstanding(&link).await, dec!(50));
    }

    #[tokio::test]
    async fn test_failed_sale_records_no_borrow() {
        let (venue, strategy) = strategy_with_prices().await;
        let link = addr("LINK");

        venue.fail_next_swap().await;
        let err = strategy.open_short(&link, dec!(50), dec!(49)).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnderlyingMarket(_)));
        assert_eq!(strategy.outstanding(&link).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_close_short_repays_borrow() {
        let (_, strategy) = strategy_with_prices().await;
        let link = addr("LINK");
        strategy.open_short(&link, dec!(50), dec!(49)).await.unwrap();

        let fill = strategy.close_short(&link, dec!(20), dec!(20)).await.unwrap();
        assert_eq!(fill.spent, dec!(20));
        assert_eq!(fill.repaid, dec!(20));
        assert_eq!(strategy.outstanding(&link).await, dec!(30));
    }
}
