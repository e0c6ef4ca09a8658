//! Market-neutral pairs trading.
//!
//! Contains the core logic for:
//! - Pair position lifecycle and the position ledger
//! - Neutral leg sizing and drift arithmetic
//! - Short-leg synthesis (pluggable, market-dependent)
//! - Collateral health monitoring for liquidation avoidance
//! - The trading engine tying it all together

mod engine;
mod health;
mod neutrality;
mod position;
mod short_leg;

pub use engine::{PairsTradingBot, PositionEvent};
pub use health::{CollateralHealth, HealthAction, HealthGuard};
pub use neutrality::{plan_legs, LegPlan};
pub use position::{PairPosition, PositionId, PositionLedger, PositionStatus};
pub use short_leg::{BorrowAgainstCollateral, ShortFill, ShortLegStrategy};
