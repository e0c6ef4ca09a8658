//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round down to the minimum accounting unit.
///
/// All amounts owed to the system and all amounts paid out are rounded
/// down, never in the caller's favor, so repeated rebalances cannot leak
/// value through rounding.
pub fn round_down_to_unit(value: Decimal, unit: Decimal) -> Decimal {
    if unit == Decimal::ZERO {
        return value;
    }
    (value / unit).floor() * unit
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Drift between two leg values as a fraction of the larger leg.
///
/// Returns zero when both legs are empty.
pub fn drift_fraction(long_value: Decimal, short_value: Decimal) -> Decimal {
    let larger = long_value.max(short_value);
    safe_div((long_value - short_value).abs(), larger)
}

/// Convert basis points to a decimal rate (1 bp = 0.01%).
pub fn from_basis_points(bps: Decimal) -> Decimal {
    bps / dec!(10000)
}
