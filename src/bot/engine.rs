//! The pairs trading engine: open, rebalance, and close market-neutral
//! pairs.
//!
//! The engine owns the position ledger exclusively. Every state-changing
//! operation holds the reentrancy guard for its full duration, and ledger
//! mutations land only after the external call they depend on has
//! succeeded — with one documented exception: a partially failed close
//! leaves the position in `Rebalancing` with its remaining notionals so a
//! retry can finish the unwind.

use crate::bot::neutrality::{check_entry_neutrality, drift, plan_legs};
use crate::bot::position::{PairPosition, PositionId, PositionLedger, PositionStatus};
use crate::bot::short_leg::ShortLegStrategy;
use crate::config::{BotConfig, ExecutionConfig};
use crate::error::ServiceError;
use crate::lending::LendingAdapter;
use crate::market::{Address, PriceOracle, PriceQuote, SwapVenue};
use crate::utils::decimal::round_down_to_unit;
use crate::utils::reentrancy::ReentrancyGuard;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Observable position lifecycle event.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum PositionEvent {
    Opened {
        id: PositionId,
        long_asset: Address,
        short_asset: Address,
        long_notional: Decimal,
        short_notional: Decimal,
        capital: Decimal,
    },
    Rebalanced {
        id: PositionId,
        long_notional: Decimal,
        short_notional: Decimal,
    },
    Closed {
        id: PositionId,
        long_proceeds: Decimal,
        short_proceeds: Decimal,
    },
}

/// Market-neutral pairs trading bot.
pub struct PairsTradingBot {
    config: BotConfig,
    execution: ExecutionConfig,
    /// The bot's own account identity at the lending adapter
    account: Address,
    adapter: Arc<LendingAdapter>,
    venue: Arc<dyn SwapVenue>,
    oracle: Arc<dyn PriceOracle>,
    short_leg: Arc<dyn ShortLegStrategy>,
    ledger: RwLock<PositionLedger>,
    events: RwLock<Vec<PositionEvent>>,
    guard: ReentrancyGuard,
}

impl PairsTradingBot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        execution: ExecutionConfig,
        account: Address,
        adapter: Arc<LendingAdapter>,
        venue: Arc<dyn SwapVenue>,
        oracle: Arc<dyn PriceOracle>,
        short_leg: Arc<dyn ShortLegStrategy>,
    ) -> Self {
        Self {
            config,
            execution,
            account,
            adapter,
            venue,
            oracle,
            short_leg,
            ledger: RwLock::new(PositionLedger::new()),
            events: RwLock::new(Vec::new()),
            guard: ReentrancyGuard::new(),
        }
    }

    /// The bot's account address at the lending adapter.
    pub fn account(&self) -> &Address {
        &self.account
    }

    /// Oracle quote, rejected when older than the freshness bound.
    async fn fresh_price(&self, asset: &Address) -> Result<PriceQuote, ServiceError> {
        let quote = self.oracle.price(asset).await?;
        let age = quote.age_secs(Utc::now());
        let bound = self.config.price_freshness_secs;
        if age < 0 || age as u64 > bound {
            return Err(ServiceError::StaleOracle {
                asset: asset.clone(),
                age_secs: age,
                bound_secs: bound,
            });
        }
        Ok(quote)
    }

    /// Open a new market-neutral pair funded with `total_capital`
    /// denomination units.
    ///
    /// Collateral is posted first; if a leg then fails, the already
    /// executed steps are compensated (legs sold back, collateral
    /// withdrawn) so no partial ledger update survives.
    pub async fn open_pair(
        &self,
        long_asset: &Address,
        short_asset: &Address,
        total_capital: Decimal,
    ) -> Result<PositionId, ServiceError> {
        let _permit = self.guard.enter()?;

        if total_capital < self.config.min_capital {
            return Err(ServiceError::InsufficientCapital {
                provided: total_capital,
                minimum: self.config.min_capital,
            });
        }

        let long_price = self.fresh_price(long_asset).await?.value;
        let short_price = self.fresh_price(short_asset).await?.value;

        let plan = plan_legs(
            total_capital,
            long_price,
            short_price,
            self.config.neutrality_tolerance,
            self.config.min_unit,
        )?;

        let denom = &self.config.denomination_asset;
        let slip = self.execution.slippage_tolerance;

        self.adapter
            .deposit(
                denom,
                total_capital,
                &self.account,
                self.execution.referral_code,
            )
            .await?;

        // Long leg: buy the long asset with half the capital.
        let min_long_out = round_down_to_unit(
            plan.long_quantity * (Decimal::ONE - slip),
            self.config.min_unit,
        );
        let long_filled = match self
            .venue
            .swap(denom, long_asset, plan.leg_value, min_long_out)
            .await
        {
            Ok(filled) => filled,
            Err(e) => {
                self.unwind_collateral(total_capital).await;
                return Err(e);
            }
        };

        // Short leg: synthesize via the configured strategy.
        let min_proceeds =
            round_down_to_unit(plan.leg_value * (Decimal::ONE - slip), self.config.min_unit);
        let short_proceeds = match self
            .short_leg
            .open_short(short_asset, plan.short_quantity, min_proceeds)
            .await
        {
            Ok(proceeds) => proceeds,
            Err(e) => {
                self.unwind_long(long_asset, long_filled).await;
                self.unwind_collateral(total_capital).await;
                return Err(e);
            }
        };

        // Executed fills must still satisfy the neutrality condition.
        if let Err(e) = check_entry_neutrality(
            long_filled * long_price,
            plan.short_quantity * short_price,
            self.config.neutrality_tolerance,
            total_capital,
        ) {
            warn!(%long_asset, %short_asset, "Executed fills violated neutrality - unwinding");
            let buyback = round_down_to_unit(
                plan.short_quantity * short_price * (Decimal::ONE + slip),
                self.config.min_unit,
            );
            if let Err(unwind_err) = self
                .short_leg
                .close_short(short_asset, plan.short_quantity, buyback)
                .await
            {
                warn!(error = %unwind_err, "Short unwind after neutrality failure also failed");
            }
            self.unwind_long(long_asset, long_filled).await;
            self.unwind_collateral(total_capital).await;
            return Err(e);
        }

        let id = {
            let mut ledger = self.ledger.write().await;
            ledger.create(
                long_asset.clone(),
                short_asset.clone(),
                long_filled,
                plan.short_quantity,
                total_capital,
                short_proceeds,
            )
        };

        info!(
            id,
            %long_asset,
            %short_asset,
            long_notional = %long_filled,
            short_notional = %plan.short_quantity,
            capital = %total_capital,
            "Pair opened"
        );
        self.events.write().await.push(PositionEvent::Opened {
            id,
            long_asset: long_asset.clone(),
            short_asset: short_asset.clone(),
            long_notional: long_filled,
            short_notional: plan.short_quantity,
            capital: total_capital,
        });

        Ok(id)
    }

    /// Restore a drifted pair to neutrality.
    ///
    /// A pair inside tolerance is a successful no-op. Otherwise the larger
    /// leg is shrunk to match the smaller one with a single swap:
    /// `Open -> Rebalancing -> Open`.
    pub async fn rebalance(&self, id: PositionId) -> Result<(), ServiceError> {
        let _permit = self.guard.enter()?;

        let (long_asset, short_asset, long_notional, short_notional) = {
            let mut ledger = self.ledger.write().await;
            let p = ledger.live_mut(id)?;
            (
                p.long_asset.clone(),
                p.short_asset.clone(),
                p.long_notional,
                p.short_notional,
            )
        };

        let long_price = self.fresh_price(&long_asset).await?.value;
        let short_price = self.fresh_price(&short_asset).await?.value;

        let long_value = long_notional * long_price;
        let short_value = short_notional * short_price;
        let current_drift = drift(long_value, short_value);

        if current_drift <= self.config.neutrality_tolerance {
            // Already neutral: succeed without touching any state.
            return Ok(());
        }
        if (long_value - short_value).abs() < self.config.min_rebalance_value {
            return Ok(());
        }

        {
            let mut ledger = self.ledger.write().await;
            ledger.live_mut(id)?.status = PositionStatus::Rebalancing;
        }

        let denom = &self.config.denomination_asset;
        let slip = self.execution.slippage_tolerance;
        let unit = self.config.min_unit;

        let result = if long_value > short_value {
            // Long-heavy: sell the excess long into the reserve.
            let excess = round_down_to_unit((long_value - short_value) / long_price, unit);
            let min_out =
                round_down_to_unit(excess * long_price * (Decimal::ONE - slip), unit);
            match self.venue.swap(&long_asset, denom, excess, min_out).await {
                Ok(proceeds) => {
                    let mut ledger = self.ledger.write().await;
                    let p = ledger.live_mut(id)?;
                    p.long_notional -= excess;
                    p.denom_reserve += proceeds;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        } else {
            // Short-heavy: buy back the excess short from the reserve.
            let excess = round_down_to_unit((short_value - long_value) / short_price, unit);
            let budget =
                round_down_to_unit(excess * short_price * (Decimal::ONE + slip), unit);
            match self.short_leg.close_short(&short_asset, excess, budget).await {
                Ok(fill) => {
                    let mut ledger = self.ledger.write().await;
                    let p = ledger.live_mut(id)?;
                    // Reconcile against the strategy's authoritative repaid
                    // quantity so the two short books stay in lockstep.
                    p.short_notional = (p.short_notional - fill.repaid).max(Decimal::ZERO);
                    p.denom_reserve -= fill.spent;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        {
            let mut ledger = self.ledger.write().await;
            ledger.live_mut(id)?.status = PositionStatus::Open;
        }

        result?;

        let (long_notional, short_notional) = {
            let ledger = self.ledger.read().await;
            let p = ledger.get(id).ok_or(ServiceError::UnknownPosition(id))?;
            (p.long_notional, p.short_notional)
        };

        info!(
            id,
            %long_notional,
            %short_notional,
            drift = %current_drift,
            "Pair rebalanced"
        );
        self.events.write().await.push(PositionEvent::Rebalanced {
            id,
            long_notional,
            short_notional,
        });

        Ok(())
    }

    /// Unwind both legs and reclaim collateral.
    ///
    /// Returns the realized proceeds split between the long side (long
    /// unwind plus net collateral) and the short side (reserve left after
    /// the buy-back). A failure after a successful leg leaves the position
    /// `Rebalancing` with that leg zeroed, so a retry completes the close;
    /// `Closed` is only reached once both legs and the withdrawal succeed.
    ///
    /// Exit is deliberately not gated on oracle freshness: quotes here
    /// only size slippage bounds, and a stale feed must not trap funds.
    pub async fn close_pair(&self, id: PositionId) -> Result<(Decimal, Decimal), ServiceError> {
        let _permit = self.guard.enter()?;

        let (long_asset, short_asset, long_notional, short_notional, collateral) = {
            let mut ledger = self.ledger.write().await;
            let p = ledger.live_mut(id)?;
            p.status = PositionStatus::Rebalancing;
            (
                p.long_asset.clone(),
                p.short_asset.clone(),
                p.long_notional,
                p.short_notional,
                p.collateral,
            )
        };

        let denom = &self.config.denomination_asset;
        let slip = self.execution.slippage_tolerance;
        let unit = self.config.min_unit;

        // Unwind the long leg.
        let mut long_out = Decimal::ZERO;
        if long_notional > Decimal::ZERO {
            let price = self.oracle.price(&long_asset).await?.value;
            let min_out =
                round_down_to_unit(long_notional * price * (Decimal::ONE - slip), unit);
            let proceeds = self
                .venue
                .swap(&long_asset, denom, long_notional, min_out)
                .await?;
            long_out = proceeds;

            let mut ledger = self.ledger.write().await;
            let p = ledger.live_mut(id)?;
            p.long_notional = Decimal::ZERO;
            // Banked so a retry after a later failure keeps the money.
            p.denom_reserve += proceeds;
        }

        // Unwind the short leg.
        if short_notional > Decimal::ZERO {
            let price = self.oracle.price(&short_asset).await?.value;
            let budget =
                round_down_to_unit(short_notional * price * (Decimal::ONE + slip), unit);
            let fill = self
                .short_leg
                .close_short(&short_asset, short_notional, budget)
                .await?;

            let mut ledger = self.ledger.write().await;
            let p = ledger.live_mut(id)?;
            p.short_notional = (p.short_notional - fill.repaid).max(Decimal::ZERO);
            p.denom_reserve -= fill.spent;
        }

        // Reclaim collateral; the market's actual amount is what counts.
        let mut withdrawn = Decimal::ZERO;
        if collateral > Decimal::ZERO {
            withdrawn = self.adapter.withdraw(denom, collateral, &self.account).await?;
        }

        let (long_proceeds, short_proceeds) = {
            let mut ledger = self.ledger.write().await;
            let p = ledger.live_mut(id)?;
            // Reserve below zero means buy-backs outspent the short bank;
            // the shortfall nets against the returned collateral.
            let short_side = (p.denom_reserve - long_out).max(Decimal::ZERO);
            let net_collateral =
                withdrawn + (p.denom_reserve - long_out).min(Decimal::ZERO);
            p.collateral = Decimal::ZERO;
            p.denom_reserve = Decimal::ZERO;
            p.status = PositionStatus::Closed;
            (long_out + net_collateral.max(Decimal::ZERO), short_side)
        };

        info!(id, %long_proceeds, %short_proceeds, "Pair closed");
        self.events.write().await.push(PositionEvent::Closed {
            id,
            long_proceeds,
            short_proceeds,
        });

        Ok((long_proceeds, short_proceeds))
    }

    /// Read a position, including closed ones.
    pub async fn position(&self, id: PositionId) -> Option<PairPosition> {
        self.ledger.read().await.get(id).cloned()
    }

    /// Ids of all non-closed positions.
    pub async fn live_ids(&self) -> Vec<PositionId> {
        self.ledger.read().await.live_ids()
    }

    /// Lifecycle events, oldest first.
    pub async fn events(&self) -> Vec<PositionEvent> {
        self.events.read().await.clone()
    }

    /// Snapshot the position ledger for persistence.
    pub async fn snapshot(&self) -> (Vec<PairPosition>, PositionId) {
        self.ledger.read().await.snapshot()
    }

    /// Restore the position ledger from a persisted snapshot.
    pub async fn restore(&self, positions: Vec<PairPosition>, next_id: PositionId) {
        self.ledger.write().await.restore(positions, next_id);
    }

    /// Best-effort compensation: sell an already-bought long leg back.
    async fn unwind_long(&self, long_asset: &Address, quantity: Decimal) {
        let denom = &self.config.denomination_asset;
        if let Err(e) = self
            .venue
            .swap(long_asset, denom, quantity, Decimal::ZERO)
            .await
        {
            warn!(%long_asset, %quantity, error = %e, "Compensating long unwind failed");
        }
    }

    /// Best-effort compensation: withdraw collateral posted this call.
    async fn unwind_collateral(&self, amount: Decimal) {
        let denom = &self.config.denomination_asset;
        if let Err(e) = self.adapter.withdraw(denom, amount, &self.account).await {
            warn!(%amount, error = %e, "Compensating collateral withdrawal failed");
        }
    }
}
