//! SQLite persistence for paper-trading state.
//!
//! Persists the deposit ledger and the position ledger to survive
//! restarts. Decimals are stored as TEXT to keep full precision; the
//! ledgers remain owned by their components, this is only a snapshot
//! store.

use crate::bot::{PairPosition, PositionId, PositionStatus};
use crate::lending::DepositRecord;
use crate::market::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Snapshot of both ledgers plus the position-id watermark.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PersistedState {
    pub deposits: Vec<(Address, DepositRecord)>,
    pub positions: Vec<PairPosition>,
    pub next_position_id: PositionId,
    pub last_saved: DateTime<Utc>,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let manager = Self { conn };
        manager.init_schema()?;
        Ok(manager)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Ledger metadata (singleton row)
            CREATE TABLE IF NOT EXISTS ledger_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                next_position_id INTEGER NOT NULL,
                last_saved TEXT NOT NULL
            );

            -- Deposit ledger
            CREATE TABLE IF NOT EXISTS deposits (
                account TEXT PRIMARY KEY,
                principal TEXT NOT NULL,
                receipt TEXT NOT NULL
            );

            -- Position ledger
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                long_asset TEXT NOT NULL,
                short_asset TEXT NOT NULL,
                long_notional TEXT NOT NULL,
                short_notional TEXT NOT NULL,
                collateral TEXT NOT NULL,
                denom_reserve TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Save the complete ledger state.
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO ledger_meta (id, next_position_id, last_saved)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                next_position_id = ?1,
                last_saved = ?2
            "#,
            params![state.next_position_id, state.last_saved.to_rfc3339()],
        )?;

        tx.execute("DELETE FROM deposits", [])?;
        for (account, record) in &state.deposits {
            tx.execute(
                "INSERT INTO deposits (account, principal, receipt) VALUES (?1, ?2, ?3)",
                params![
                    account.as_str(),
                    record.principal.to_string(),
                    record.receipt.to_string(),
                ],
            )?;
        }

        tx.execute("DELETE FROM positions", [])?;
        for pos in &state.positions {
            tx.execute(
                r#"
                INSERT INTO positions (id, long_asset, short_asset, long_notional,
                                       short_notional, collateral, denom_reserve,
                                       opened_at, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    pos.id,
                    pos.long_asset.as_str(),
                    pos.short_asset.as_str(),
                    pos.long_notional.to_string(),
                    pos.short_notional.to_string(),
                    pos.collateral.to_string(),
                    pos.denom_reserve.to_string(),
                    pos.opened_at.to_rfc3339(),
                    pos.status.as_str(),
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            deposits = state.deposits.len(),
            positions = state.positions.len(),
            "State saved to database"
        );
        Ok(())
    }

    /// Load the ledger state from the database.
    pub fn load_state(&self) -> Result<Option<PersistedState>> {
        let meta: Option<(PositionId, String)> = self
            .conn
            .query_row(
                "SELECT next_position_id, last_saved FROM ledger_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((next_position_id, last_saved)) = meta else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT account, principal, receipt FROM deposits")?;
        let deposits: Vec<(Address, DepositRecord)> = stmt
            .query_map([], |row| {
                Ok((
                    Address::new(row.get::<_, String>(0)?),
                    DepositRecord {
                        principal: Decimal::from_str(&row.get::<_, String>(1)?)
                            .unwrap_or_default(),
                        receipt: Decimal::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, long_asset, short_asset, long_notional, short_notional,
                   collateral, denom_reserve, opened_at, status
            FROM positions ORDER BY id
            "#,
        )?;
        let positions: Vec<PairPosition> = stmt
            .query_map([], |row| {
                Ok(PairPosition {
                    id: row.get(0)?,
                    long_asset: Address::new(row.get::<_, String>(1)?),
                    short_asset: Address::new(row.get::<_, String>(2)?),
                    long_notional: Decimal::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or_default(),
                    short_notional: Decimal::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or_default(),
                    collateral: Decimal::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
                    denom_reserve: Decimal::from_str(&row.get::<_, String>(6)?)
                        .unwrap_or_default(),
                    opened_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(7)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    status: PositionStatus::from_str(&row.get::<_, String>(8)?)
                        .unwrap_or(PositionStatus::Open),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let state = PersistedState {
            deposits,
            positions,
            next_position_id,
            last_saved: DateTime::parse_from_rfc3339(&last_saved)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        };

        info!(
            deposits = state.deposits.len(),
            positions = state.positions.len(),
            last_saved = %state.last_saved,
            "Loaded state from database"
        );

        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_state() -> PersistedState {
        PersistedState {
            deposits: vec![(
                Address::new("bot"),
                DepositRecord {
                    principal: dec!(100),
                    receipt: dec!(100.5),
                },
            )],
            positions: vec![PairPosition {
                id: 1,
                long_asset: Address::new("SNX"),
                short_asset: Address::new("LINK"),
                long_notional: dec!(25),
                short_notional: dec!(50),
                collateral: dec!(100),
                denom_reserve: dec!(50),
                opened_at: Utc::now(),
                status: PositionStatus::Open,
            }],
            next_position_id: 2,
            last_saved: Utc::now(),
        }
    }

    #[test]
    fn test_empty_database_loads_nothing() {
        let manager = PersistenceManager::in_memory().unwrap();
        assert!(manager.load_state().unwrap().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let manager = PersistenceManager::in_memory().unwrap();
        let state = sample_state();
        manager.save_state(&state).unwrap();

        let loaded = manager.load_state().unwrap().unwrap();
        assert_eq!(loaded.deposits, state.deposits);
        assert_eq!(loaded.positions.len(), 1);
        assert_eq!(loaded.positions[0].id, state.positions[0].id);
        assert_eq!(loaded.positions[0].long_notional, dec!(25));
        assert_eq!(loaded.positions[0].status, PositionStatus::Open);
        assert_eq!(loaded.next_position_id, 2);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let manager = PersistenceManager::in_memory().unwrap();
        let mut state = sample_state();
        manager.save_state(&state).unwrap();

        state.positions[0].status = PositionStatus::Closed;
        state.next_position_id = 5;
        manager.save_state(&state).unwrap();

        let loaded = manager.load_state().unwrap().unwrap();
        assert_eq!(loaded.positions[0].status, PositionStatus::Closed);
        assert_eq!(loaded.next_position_id, 5);
    }
}
