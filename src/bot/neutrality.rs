//! Neutral leg sizing and drift arithmetic.
//!
//! The only nontrivial arithmetic in the bot: splitting capital into two
//! value-matched legs at entry, and measuring how far live prices have
//! pushed the pair from that neutral target. All quantities round down to
//! the minimum accounting unit — never in the caller's favor — so repeated
//! rebalances cannot leak value through rounding.

use crate::error::ServiceError;
use crate::utils::decimal::{drift_fraction, round_down_to_unit};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Planned leg sizes for a new pair.
#[derive(Debug, Clone, PartialEq)]
pub struct LegPlan {
    /// Denomination value assigned to each leg (half the capital, rounded)
    pub leg_value: Decimal,
    /// Quantity of the long asset to buy
    pub long_quantity: Decimal,
    /// Quantity of the short asset to short
    pub short_quantity: Decimal,
}

/// Split `total_capital` into two value-matched legs at the given prices.
///
/// Fails with `NeutralityViolation` when rounding to the minimum unit
/// leaves the planned legs further apart than `tolerance * total_capital`
/// (only possible with coarse units relative to the capital).
pub fn plan_legs(
    total_capital: Decimal,
    long_price: Decimal,
    short_price: Decimal,
    tolerance: Decimal,
    min_unit: Decimal,
) -> Result<LegPlan, ServiceError> {
    let leg_value = round_down_to_unit(total_capital / dec!(2), min_unit);
    let long_quantity = round_down_to_unit(leg_value / long_price, min_unit);
    let short_quantity = round_down_to_unit(leg_value / short_price, min_unit);

    let long_value = long_quantity * long_price;
    let short_value = short_quantity * short_price;
    if (long_value - short_value).abs() > tolerance * total_capital {
        return Err(ServiceError::NeutralityViolation {
            long_value,
            short_value,
            tolerance,
        });
    }

    Ok(LegPlan {
        leg_value,
        long_quantity,
        short_quantity,
    })
}

/// Drift of a live pair from neutrality, as a fraction of the larger leg.
pub fn drift(long_value: Decimal, short_value: Decimal) -> Decimal {
    drift_fraction(long_value, short_value)
}

/// Verify that executed fills landed inside the entry tolerance.
pub fn check_entry_neutrality(
    long_value: Decimal,
    short_value: Decimal,
    tolerance: Decimal,
    total_capital: Decimal,
) -> Result<(), ServiceError> {
    if (long_value - short_value).abs() > tolerance * total_capital {
        return Err(ServiceError::NeutralityViolation {
            long_value,
            short_value,
            tolerance,
        });
    }
    Ok(())
}
