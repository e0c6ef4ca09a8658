//! Collateral health monitoring and liquidation avoidance.
//!
//! Classifies each live pair by how well its posted collateral covers the
//! short-leg exposure and recommends an action. Purely advisory: the
//! keeper decides whether to act, and only the engine mutates ledgers.

use crate::bot::position::{PairPosition, PositionId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, warn};

/// Collateral coverage zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CollateralHealth {
    /// Coverage comfortably above the warning threshold
    Green,
    /// Coverage eroding; rebalance soon
    Yellow,
    /// Coverage close to the liquidation point; exit now
    Red,
}

/// Recommended action for a position at risk.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum HealthAction {
    None,
    Rebalance { id: PositionId },
    Close { id: PositionId },
}

/// Thresholds on the collateral-to-short-exposure ratio.
#[derive(Debug, Clone)]
pub struct HealthGuard {
    /// Below this coverage ratio the position is Yellow
    pub warn_ratio: Decimal,
    /// Below this coverage ratio the position is Red
    pub critical_ratio: Decimal,
}

impl Default for HealthGuard {
    fn default() -> Self {
        Self {
            warn_ratio: dec!(1.5),
            critical_ratio: dec!(1.1),
        }
    }
}

impl HealthGuard {
    /// Classify coverage of short exposure by collateral plus reserve.
    pub fn classify(&self, collateral_value: Decimal, short_exposure: Decimal) -> CollateralHealth {
        if short_exposure <= Decimal::ZERO {
            return CollateralHealth::Green;
        }
        let ratio = collateral_value / short_exposure;
        if ratio < self.critical_ratio {
            CollateralHealth::Red
        } else if ratio < self.warn_ratio {
            CollateralHealth::Yellow
        } else {
            CollateralHealth::Green
        }
    }

    /// Evaluate one position at the given short-asset price.
    pub fn evaluate(&self, position: &PairPosition, short_price: Decimal) -> HealthAction {
        let short_exposure = position.short_notional * short_price;
        let cover = position.collateral + position.denom_reserve;

        match self.classify(cover, short_exposure) {
            CollateralHealth::Green => HealthAction::None,
            CollateralHealth::Yellow => {
                warn!(
                    id = position.id,
                    %cover,
                    %short_exposure,
                    "Collateral coverage in yellow zone"
                );
                HealthAction::Rebalance { id: position.id }
            }
            CollateralHealth::Red => {
                error!(
                    id = position.id,
                    %cover,
                    %short_exposure,
                    "Collateral coverage critical - close position"
                );
                HealthAction::Close { id: position.id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::position::PositionStatus;
    use crate::market::Address;
    use chrono::Utc;

    fn test_position(short_notional: Decimal, collateral: Decimal) -> PairPosition {
        PairPosition {
            id: 1,
            long_asset: Address::new("SNX"),
            short_asset: Address::new("LINK"),
            long_notional: dec!(25),
            short_notional,
            collateral,
            denom_reserve: Decimal::ZERO,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn test_zones() {
        let guard = HealthGuard::default();
        assert_eq!(guard.classify(dec!(200), dec!(100)), CollateralHealth::Green);
        assert_eq!(guard.classify(dec!(120), dec!(100)), CollateralHealth::Yellow);
        assert_eq!(guard.classify(dec!(100), dec!(100)), CollateralHealth::Red);
        // No short exposure, nothing to cover
        assert_eq!(guard.classify(dec!(0), dec!(0)), CollateralHealth::Green);
    }

    #[test]
    fn test_evaluate_recommends_close_in_red() {
        let guard = HealthGuard::default();
        // Short worth 100 at price 2, covered by only 105
        let position = test_position(dec!(50), dec!(105));
        assert_eq!(
            guard.evaluate(&position, dec!(2)),
            HealthAction::Close { id: 1 }
        );
    }

    #[test]
    fn test_evaluate_recommends_rebalance_in_yellow() {
        let guard = HealthGuard::default();
        let position = test_position(dec!(50), dec!(130));
        assert_eq!(
            guard.evaluate(&position, dec!(2)),
            HealthAction::Rebalance { id: 1 }
        );
    }
}
