//! External market collaborators.
//!
//! The lending market, swap venue, and price oracle are external systems
//! reached through dynamically wired addresses. Each one is represented
//! here as a trait so the bot and adapter can be exercised against
//! in-memory doubles in paper-trading mode and against real connectors in
//! production.

pub mod mock;
mod traits;
mod types;

pub use mock::{MockLendingMarket, MockPriceOracle, MockSwapVenue};
pub use traits::{LendingMarket, PriceOracle, SwapVenue};
pub use types::*;
