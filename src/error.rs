//! Error taxonomy shared by the lending adapter and the trading bot.
//!
//! Every failure is surfaced with enough detail to tell which class it
//! belongs to: bad caller input, missing authorization/balance, a failed
//! external market call, a violated consistency rule, or a reentrant call.
//! Nothing is silently swallowed and no automatic retries happen here;
//! retry policy belongs to the keeper layer.

use crate::market::Address;
use rust_decimal::Decimal;
use thiserror::Error;

/// Broad classification of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input (zero amount, unknown position id, ...)
    Validation,
    /// Caller lacks the required balance, allowance, or role
    Authorization,
    /// The lending market or swap venue call failed
    ExternalMarket,
    /// Neutrality or oracle-freshness rule violated
    Consistency,
    /// Nested call detected while an operation was in flight
    Reentrancy,
}

/// Errors raised by the lending adapter and the pairs trading bot.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("asset {given} is not the configured underlying asset {expected}")]
    AssetMismatch { given: Address, expected: Address },

    #[error("unknown or closed position {0}")]
    UnknownPosition(u64),

    #[error("capital {provided} is below the configured minimum {minimum}")]
    InsufficientCapital { provided: Decimal, minimum: Decimal },

    #[error("account {account} holds {available} but {requested} is required")]
    InsufficientBalance {
        account: Address,
        available: Decimal,
        requested: Decimal,
    },

    #[error("allowance {available} from {owner} is below required {requested}")]
    InsufficientAllowance {
        owner: Address,
        available: Decimal,
        requested: Decimal,
    },

    #[error("deposit balance {available} of {account} is below requested {requested}")]
    InsufficientDeposit {
        account: Address,
        available: Decimal,
        requested: Decimal,
    },

    #[error("underlying market call failed: {0}")]
    UnderlyingMarket(String),

    #[error("swap output {amount_out} is below the minimum {min_amount_out}")]
    SlippageExceeded {
        amount_out: Decimal,
        min_amount_out: Decimal,
    },

    #[error("leg values {long_value} / {short_value} exceed neutrality tolerance {tolerance}")]
    NeutralityViolation {
        long_value: Decimal,
        short_value: Decimal,
        tolerance: Decimal,
    },

    #[error("price for {asset} is {age_secs}s old, freshness bound is {bound_secs}s")]
    StaleOracle {
        asset: Address,
        age_secs: i64,
        bound_secs: u64,
    },

    #[error("reentrant call rejected")]
    ReentrantCall,
}

impl ServiceError {
    /// Map the variant onto its taxonomy class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::ZeroAmount
            | ServiceError::AssetMismatch { .. }
            | ServiceError::UnknownPosition(_)
            | ServiceError::InsufficientCapital { .. } => ErrorKind::Validation,

            ServiceError::InsufficientBalance { .. }
            | ServiceError::InsufficientAllowance { .. }
            | ServiceError::InsufficientDeposit { .. } => ErrorKind::Authorization,

            ServiceError::UnderlyingMarket(_) | ServiceError::SlippageExceeded { .. } => {
                ErrorKind::ExternalMarket
            }

            ServiceError::NeutralityViolation { .. } | ServiceError::StaleOracle { .. } => {
                ErrorKind::Consistency
            }

            ServiceError::ReentrantCall => ErrorKind::Reentrancy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ServiceError::ZeroAmount.kind(), ErrorKind::Validation);
        assert_eq!(
            ServiceError::UnknownPosition(7).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ServiceError::UnderlyingMarket("reverted".into()).kind(),
            ErrorKind::ExternalMarket
        );
        assert_eq!(
            ServiceError::SlippageExceeded {
                amount_out: dec!(99),
                min_amount_out: dec!(100),
            }
            .kind(),
            ErrorKind::ExternalMarket
        );
        assert_eq!(ServiceError::ReentrantCall.kind(), ErrorKind::Reentrancy);
    }
}
