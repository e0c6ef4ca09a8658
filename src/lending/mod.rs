//! Lending adapter over the external lending market.
//!
//! Owns the deposit ledger exclusively; the bot and any other caller reach
//! deposited balances only through the adapter's public operations.

mod adapter;

pub use adapter::{DepositRecord, LendingAdapter};
