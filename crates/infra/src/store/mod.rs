//! SQLite-backed Inventory Store.
//!
//! Owns the four ledger tables (drums, grids, transactions, drum_history)
//! plus `ledger_settings`. Every state change runs inside one
//! `sqlx::Transaction`: dropping it without `commit` rolls back, so a failed
//! operation never leaves a partial write behind.
//!
//! ## Thread Safety
//!
//! `InventoryStore` is `Send + Sync` and cheap to clone; all access goes
//! through the SQLx connection pool.

pub(crate) mod rows;
pub(crate) mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, instrument};

use drumledger_inventory::OccupancyMode;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, map_sqlx_error};

const OCCUPANCY_SETTING: &str = "occupancy_mode";

#[derive(Debug, Clone)]
pub struct InventoryStore {
    pool: SqlitePool,
    mode: OccupancyMode,
}

impl InventoryStore {
    /// Open (creating if missing) the ledger database described by `config`.
    ///
    /// Creates the schema, seeds the grid set, and pins the occupancy mode:
    /// reopening a ledger with a different mode fails with `Validation`.
    #[instrument(skip(config), fields(database_url = %config.database_url, occupancy = %config.occupancy), err)]
    pub async fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| map_sqlx_error("parse_database_url", e))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);

        if config.is_in_memory() {
            // Each in-memory connection is its own database; keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self {
            pool,
            mode: config.occupancy,
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> LedgerResult<()> {
        let mut tx = self.begin("initialize").await?;
        schema::ensure_schema(&mut tx).await?;
        pin_occupancy_mode(&mut tx, self.mode).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("initialize", e))?;
        debug!(occupancy = %self.mode, "ledger schema ready");
        Ok(())
    }

    pub fn mode(&self) -> OccupancyMode {
        self.mode
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start the atomic unit for one operation.
    pub(crate) async fn begin(
        &self,
        operation: &str,
    ) -> LedgerResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Record the occupancy mode on first open; reject a different mode afterwards.
async fn pin_occupancy_mode(conn: &mut SqliteConnection, mode: OccupancyMode) -> LedgerResult<()> {
    sqlx::query("INSERT OR IGNORE INTO ledger_settings (Key, Value) VALUES (?1, ?2)")
        .bind(OCCUPANCY_SETTING)
        .bind(mode.as_setting())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("pin_occupancy_mode", e))?;

    let row = sqlx::query("SELECT Value FROM ledger_settings WHERE Key = ?1")
        .bind(OCCUPANCY_SETTING)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("pin_occupancy_mode", e))?;
    let stored: String = row
        .try_get("Value")
        .map_err(|e| map_sqlx_error("pin_occupancy_mode", e))?;

    let stored_mode = OccupancyMode::parse_setting(&stored).map_err(|e| {
        LedgerError::storage("pin_occupancy_mode", format!("corrupt setting: {e}"))
    })?;
    if stored_mode != mode {
        return Err(LedgerError::Validation(format!(
            "ledger was created with occupancy mode '{stored_mode}', cannot open it as '{mode}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drumledger_core::{DrumId, Entity, ExpectedVersion, GridId};
    use drumledger_inventory::{GridStatus, grid_layout};

    async fn memory_store() -> InventoryStore {
        InventoryStore::open(&LedgerConfig::in_memory(OccupancyMode::Single))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_seeds_nine_available_grids() {
        let store = memory_store().await;
        let mut conn = store.pool().acquire().await.unwrap();
        let grids = rows::load_grids(&mut conn).await.unwrap();

        assert_eq!(grids.len(), 9);
        assert!(grids.iter().all(|g| g.status() == GridStatus::Available));
        let ids: Vec<GridId> = grids.iter().map(|g| g.id().clone()).collect();
        assert_eq!(ids, grid_layout());
    }

    #[tokio::test]
    async fn stale_grid_version_is_a_conflict() {
        let store = memory_store().await;
        let mut conn = store.pool().acquire().await.unwrap();
        let grid_id = GridId::parse("A1").unwrap();
        let grid = rows::require_grid(&mut conn, &grid_id).await.unwrap();

        let occupied = grid.recomputed(OccupancyMode::Single, &[DrumId::parse("D001").unwrap()]);
        rows::save_grid(&mut conn, &occupied, ExpectedVersion::Exact(grid.version()))
            .await
            .unwrap();

        // A second writer still holding the old version loses.
        let err = rows::save_grid(&mut conn, &occupied, ExpectedVersion::Exact(grid.version()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_grid_is_not_found() {
        let store = memory_store().await;
        let mut conn = store.pool().acquire().await.unwrap();
        let err = rows::require_grid(&mut conn, &GridId::parse("Z9").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn reopening_with_another_mode_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());

        let single = LedgerConfig {
            database_url: url.clone(),
            ..LedgerConfig::default()
        };
        InventoryStore::open(&single).await.unwrap().close().await;

        let shared = LedgerConfig {
            database_url: url,
            occupancy: OccupancyMode::Shared { capacity: None },
            ..LedgerConfig::default()
        };
        let err = InventoryStore::open(&shared).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
