//! Shared types for the external market seam.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address-shaped identity for accounts, assets, and services.
///
/// Kept opaque: the core never parses it, only compares and hashes it, so
/// any chain's address format (or a test label) works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A price observation from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Price in the neutral denomination asset
    pub value: Decimal,
    /// When the observation was taken
    pub timestamp: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(value: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Age of the quote relative to `now`, in whole seconds.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

/// Per-reserve metadata exposed by the lending market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveData {
    /// Yield-bearing receipt token minted against deposits of this reserve
    pub receipt_token: Address,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_address_display_and_eq() {
        let a = Address::new("0xAb");
        assert_eq!(a.to_string(), "0xAb");
        assert_eq!(a, Address::from("0xAb"));
    }

    #[test]
    fn test_quote_age() {
        let now = Utc::now();
        let quote = PriceQuote::new(dec!(2), now - chrono::Duration::seconds(90));
        assert_eq!(quote.age_secs(now), 90);
    }
}
