//! Pair position lifecycle and ledger.

use crate::error::ServiceError;
use crate::market::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a pair position, unique for the life of the ledger.
pub type PositionId = u64;

/// Lifecycle state of a pair position.
///
/// `Open -> Rebalancing -> Open` repeats; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Rebalancing,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "Open",
            PositionStatus::Rebalancing => "Rebalancing",
            PositionStatus::Closed => "Closed",
        }
    }
}

impl std::str::FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(PositionStatus::Open),
            "Rebalancing" => Ok(PositionStatus::Rebalancing),
            "Closed" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status: {other}")),
        }
    }
}

/// One market-neutral pair: long one asset, short another, value-matched
/// at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPosition {
    pub id: PositionId,
    pub long_asset: Address,
    pub short_asset: Address,
    /// Quantity of the long asset held
    pub long_notional: Decimal,
    /// Quantity of the short asset owed
    pub short_notional: Decimal,
    /// Collateral posted through the lending adapter, denomination units
    pub collateral: Decimal,
    /// Denomination-asset reserve held against the position (short-sale
    /// proceeds plus any rebalance skim), drawn on to buy the short back.
    /// Can dip below zero mid-close when the buy-back outspends it; the
    /// shortfall nets against the reclaimed collateral
    pub denom_reserve: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

/// Exclusively-owned table of pair positions keyed by id.
///
/// Closed positions stay in the table for inspection but reject every
/// mutating operation.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<PositionId, PairPosition>,
    next_id: PositionId,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a freshly opened position, allocating its id.
    pub fn create(
        &mut self,
        long_asset: Address,
        short_asset: Address,
        long_notional: Decimal,
        short_notional: Decimal,
        collateral: Decimal,
        denom_reserve: Decimal,
    ) -> PositionId {
        let id = self.next_id;
        self.next_id += 1;
        self.positions.insert(
            id,
            PairPosition {
                id,
                long_asset,
                short_asset,
                long_notional,
                short_notional,
                collateral,
                denom_reserve,
                opened_at: Utc::now(),
                status: PositionStatus::Open,
            },
        );
        id
    }

    /// Read access to any position, including closed ones.
    pub fn get(&self, id: PositionId) -> Option<&PairPosition> {
        self.positions.get(&id)
    }

    /// Mutable access to a live position.
    ///
    /// Fails with `UnknownPosition` when the id does not exist or the
    /// position is `Closed` — closed is terminal.
    pub fn live_mut(&mut self, id: PositionId) -> Result<&mut PairPosition, ServiceError> {
        match self.positions.get_mut(&id) {
            Some(p) if p.status != PositionStatus::Closed => Ok(p),
            _ => Err(ServiceError::UnknownPosition(id)),
        }
    }

    /// Ids of all non-closed positions.
    pub fn live_ids(&self) -> Vec<PositionId> {
        let mut ids: Vec<_> = self
            .positions
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot for persistence: every position plus the id watermark.
    pub fn snapshot(&self) -> (Vec<PairPosition>, PositionId) {
        let mut positions: Vec<_> = self.positions.values().cloned().collect();
        positions.sort_unstable_by_key(|p| p.id);
        (positions, self.next_id)
    }

    /// Restore from a persisted snapshot.
    pub fn restore(&mut self, positions: Vec<PairPosition>, next_id: PositionId) {
        self.positions = positions.into_iter().map(|p| (p.id, p)).collect();
        self.next_id = next_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_ledger() -> (PositionLedger, PositionId) {
        let mut ledger = PositionLedger::new();
        let id = ledger.create(
            Address::new("SNX"),
            Address::new("LINK"),
            dec!(25),
            dec!(50),
            dec!(100),
            dec!(50),
        );
        (ledger, id)
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let (mut ledger, first) = sample_ledger();
        let second = ledger.create(
            Address::new("SNX"),
            Address::new("LINK"),
            dec!(1),
            dec!(2),
            dec!(10),
            dec!(5),
        );
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(ledger.live_ids(), vec![1, 2]);
    }

    #[test]
    fn test_closed_is_terminal() {
        let (mut ledger, id) = sample_ledger();
        ledger.live_mut(id).unwrap().status = PositionStatus::Closed;

        assert!(matches!(
            ledger.live_mut(id).unwrap_err(),
            ServiceError::UnknownPosition(_)
        ));
        assert!(ledger.live_ids().is_empty());
        // Still readable for inspection
        assert_eq!(ledger.get(id).unwrap().status, PositionStatus::Closed);
    }

    #[test]
    fn test_unknown_id_rejected() {
        let (mut ledger, _) = sample_ledger();
        assert!(matches!(
            ledger.live_mut(99).unwrap_err(),
            ServiceError::UnknownPosition(99)
        ));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let (ledger, _) = sample_ledger();
        let (positions, next_id) = ledger.snapshot();

        let mut restored = PositionLedger::new();
        restored.restore(positions.clone(), next_id);
        assert_eq!(restored.snapshot(), (positions, next_id));
    }
}
