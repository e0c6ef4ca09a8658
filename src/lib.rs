//! # Pairs Trading Bot
//!
//! Market-neutral pairs trading over an external lending market and swap
//! venue. A pair position holds a long leg in one asset and a short leg in
//! another, sized to be value-neutral at entry, with collateral posted to
//! the lending market through a balance-tracking adapter.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `market`: External collaborator interfaces (lending market, swap venue,
//!   price oracle) plus in-memory mocks for paper trading
//! - `lending`: Lending adapter with its exclusively-owned deposit ledger
//! - `bot`: Position ledger, neutrality arithmetic, rebalancing and
//!   collateral-health logic
//! - `persistence`: SQLite-based state persistence for paper trading
//! - `utils`: Shared utilities and decimal arithmetic

pub mod bot;
pub mod config;
pub mod error;
pub mod lending;
pub mod market;
pub mod persistence;
pub mod utils;

pub use config::Config;
pub use error::{ErrorKind, ServiceError};
