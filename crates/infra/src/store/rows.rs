//! Row types and the read/write statements behind every table.
//!
//! All functions take a `&mut SqliteConnection` so the engine can run them
//! inside one `sqlx::Transaction` and the query layer inside a read
//! transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};

use drumledger_core::{AggregateRoot, DomainError, DrumId, Entity, ExpectedVersion, GridId};
use drumledger_inventory::{
    Drum, DrumMetadata, DrumState, DrumStatus, Grid, GridStatus, HistId, HistoryEntry,
    Transaction, TxnId, TxnKind,
};

use crate::error::{LedgerError, LedgerResult, map_sqlx_error};

fn corrupt(table: &str, err: DomainError) -> LedgerError {
    LedgerError::storage("decode_row", format!("corrupt {table} row: {err}"))
}

// SQLx row types

/// Raw `drums` row; nullable columns stay nullable until validated.
#[derive(Debug, Clone)]
pub(crate) struct DrumRow {
    pub drum_id: String,
    pub order_no: Option<String>,
    pub quantity: Option<String>,
    pub ra: Option<String>,
    pub cell_type: Option<String>,
    pub status: String,
    pub current_grid: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub version: i64,
}

impl<'r> FromRow<'r, SqliteRow> for DrumRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(DrumRow {
            drum_id: row.try_get("DrumID")?,
            order_no: row.try_get("OrderNo")?,
            quantity: row.try_get("Quantity")?,
            ra: row.try_get("RA")?,
            cell_type: row.try_get("CellType")?,
            status: row.try_get("Status")?,
            current_grid: row.try_get("CurrentGrid")?,
            last_updated: row.try_get("LastUpdated")?,
            version: row.try_get("Version")?,
        })
    }
}

impl DrumRow {
    pub(crate) fn has_metadata(&self) -> bool {
        self.order_no.is_some()
            || self.quantity.is_some()
            || self.ra.is_some()
            || self.cell_type.is_some()
    }

    pub(crate) fn into_drum(self) -> LedgerResult<Drum> {
        let id = DrumId::parse(&self.drum_id).map_err(|e| corrupt("drums", e))?;
        let status: DrumStatus = self.status.parse().map_err(|e| corrupt("drums", e))?;

        let state = match (status, self.current_grid) {
            (DrumStatus::In, Some(grid)) => {
                let metadata = DrumMetadata {
                    order_no: self.order_no.unwrap_or_default(),
                    quantity: self.quantity.unwrap_or_default(),
                    ra: self.ra.unwrap_or_default(),
                    cell_type: self.cell_type.unwrap_or_default(),
                };
                metadata.validate().map_err(|e| corrupt("drums", e))?;
                DrumState::Stored {
                    grid: GridId::parse(&grid).map_err(|e| corrupt("drums", e))?,
                    metadata,
                }
            }
            (DrumStatus::Out, None) => DrumState::Out,
            (status, grid) => {
                return Err(corrupt(
                    "drums",
                    DomainError::invalid_state(format!(
                        "drum {id} has status {status} with grid {grid:?}"
                    )),
                ));
            }
        };

        Ok(Drum::restore(
            id,
            state,
            Some(self.last_updated),
            self.version as u64,
        ))
    }
}

#[derive(Debug, Clone)]
struct GridRow {
    grid_id: String,
    status: String,
    current_drum_id: Option<String>,
    version: i64,
}

impl<'r> FromRow<'r, SqliteRow> for GridRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(GridRow {
            grid_id: row.try_get("GridID")?,
            status: row.try_get("Status")?,
            current_drum_id: row.try_get("CurrentDrumID")?,
            version: row.try_get("Version")?,
        })
    }
}

impl GridRow {
    fn into_grid(self) -> LedgerResult<Grid> {
        let id = GridId::parse(&self.grid_id).map_err(|e| corrupt("grids", e))?;
        let status: GridStatus = self.status.parse().map_err(|e| corrupt("grids", e))?;
        let current_drum = self
            .current_drum_id
            .map(|d| DrumId::parse(&d))
            .transpose()
            .map_err(|e| corrupt("grids", e))?;
        Ok(Grid::restore(id, status, current_drum, self.version as u64))
    }
}

#[derive(Debug, Clone)]
struct TransactionRow {
    txn_id: i64,
    drum_id: String,
    grid_id: String,
    status: String,
    timestamp: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for TransactionRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            txn_id: row.try_get("TxnID")?,
            drum_id: row.try_get("DrumID")?,
            grid_id: row.try_get("GridID")?,
            status: row.try_get("Status")?,
            timestamp: row.try_get("Timestamp")?,
        })
    }
}

impl TransactionRow {
    fn into_transaction(self) -> LedgerResult<Transaction> {
        let kind: TxnKind = self.status.parse().map_err(|e| corrupt("transactions", e))?;
        Ok(Transaction {
            txn_id: TxnId(self.txn_id),
            drum_id: DrumId::parse(&self.drum_id).map_err(|e| corrupt("transactions", e))?,
            grid_id: GridId::parse(&self.grid_id).map_err(|e| corrupt("transactions", e))?,
            kind,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, Clone)]
struct HistoryRow {
    hist_id: i64,
    drum_id: String,
    order_no: String,
    quantity: String,
    ra: String,
    cell_type: String,
    grid_id: String,
    timestamp: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for HistoryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(HistoryRow {
            hist_id: row.try_get("HistID")?,
            drum_id: row.try_get("DrumID")?,
            order_no: row.try_get("OrderNo")?,
            quantity: row.try_get("Quantity")?,
            ra: row.try_get("RA")?,
            cell_type: row.try_get("CellType")?,
            grid_id: row.try_get("GridID")?,
            timestamp: row.try_get("Timestamp")?,
        })
    }
}

impl HistoryRow {
    fn into_entry(self) -> LedgerResult<HistoryEntry> {
        Ok(HistoryEntry {
            hist_id: HistId(self.hist_id),
            drum_id: DrumId::parse(&self.drum_id).map_err(|e| corrupt("drum_history", e))?,
            metadata: DrumMetadata {
                order_no: self.order_no,
                quantity: self.quantity,
                ra: self.ra,
                cell_type: self.cell_type,
            },
            grid_id: GridId::parse(&self.grid_id).map_err(|e| corrupt("drum_history", e))?,
            timestamp: self.timestamp,
        })
    }
}

fn decode<T>(operation: &str, row: &SqliteRow) -> LedgerResult<T>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    T::from_row(row).map_err(|e| map_sqlx_error(operation, e))
}

// Drums

pub(crate) async fn load_drum(
    conn: &mut SqliteConnection,
    drum_id: &DrumId,
) -> LedgerResult<Option<Drum>> {
    let row = sqlx::query(
        r#"
        SELECT DrumID, OrderNo, Quantity, RA, CellType, Status, CurrentGrid, LastUpdated, Version
        FROM drums
        WHERE DrumID = ?1
        "#,
    )
    .bind(drum_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_drum", e))?;

    row.map(|row| decode::<DrumRow>("load_drum", &row)?.into_drum())
        .transpose()
}

pub(crate) async fn load_drum_rows(conn: &mut SqliteConnection) -> LedgerResult<Vec<DrumRow>> {
    let rows = sqlx::query(
        r#"
        SELECT DrumID, OrderNo, Quantity, RA, CellType, Status, CurrentGrid, LastUpdated, Version
        FROM drums
        ORDER BY DrumID ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_drums", e))?;

    rows.iter()
        .map(|row| decode::<DrumRow>("load_drums", row))
        .collect()
}

pub(crate) async fn load_drums(conn: &mut SqliteConnection) -> LedgerResult<Vec<Drum>> {
    load_drum_rows(conn)
        .await?
        .into_iter()
        .map(DrumRow::into_drum)
        .collect()
}

/// Stored drums whose order number matches exactly (case-sensitive).
pub(crate) async fn drums_by_order(
    conn: &mut SqliteConnection,
    order_no: &str,
) -> LedgerResult<Vec<Drum>> {
    let rows = sqlx::query(
        r#"
        SELECT DrumID, OrderNo, Quantity, RA, CellType, Status, CurrentGrid, LastUpdated, Version
        FROM drums
        WHERE OrderNo = ?1
        ORDER BY DrumID ASC
        "#,
    )
    .bind(order_no)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("drums_by_order", e))?;

    rows.iter()
        .map(|row| decode::<DrumRow>("drums_by_order", row)?.into_drum())
        .collect()
}

/// Persist a drum with compare-and-swap on its version.
///
/// `ExpectedVersion::Absent` inserts; a concurrent insert of the same id is a
/// unique violation and surfaces as `Conflict`. `Exact(v)` updates only if the
/// stored row is still at `v`.
pub(crate) async fn save_drum(
    conn: &mut SqliteConnection,
    drum: &Drum,
    expected: ExpectedVersion,
) -> LedgerResult<()> {
    let last_updated = drum
        .last_updated()
        .ok_or_else(|| LedgerError::storage("save_drum", "drum has no timestamp"))?;
    let metadata = drum.metadata();
    let grid = drum.current_grid().map(|g| g.as_str());

    let result = match expected {
        ExpectedVersion::Absent => sqlx::query(
            r#"
            INSERT INTO drums (
                DrumID, OrderNo, Quantity, RA, CellType, Status, CurrentGrid, LastUpdated, Version
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(drum.id_typed().as_str())
        .bind(metadata.map(|m| m.order_no.as_str()))
        .bind(metadata.map(|m| m.quantity.as_str()))
        .bind(metadata.map(|m| m.ra.as_str()))
        .bind(metadata.map(|m| m.cell_type.as_str()))
        .bind(drum.status().as_str())
        .bind(grid)
        .bind(last_updated)
        .bind(drum.version() as i64)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_drum", e))?,

        ExpectedVersion::Exact(version) => sqlx::query(
            r#"
            UPDATE drums
            SET OrderNo = ?2,
                Quantity = ?3,
                RA = ?4,
                CellType = ?5,
                Status = ?6,
                CurrentGrid = ?7,
                LastUpdated = ?8,
                Version = ?9
            WHERE DrumID = ?1 AND Version = ?10
            "#,
        )
        .bind(drum.id_typed().as_str())
        .bind(metadata.map(|m| m.order_no.as_str()))
        .bind(metadata.map(|m| m.quantity.as_str()))
        .bind(metadata.map(|m| m.ra.as_str()))
        .bind(metadata.map(|m| m.cell_type.as_str()))
        .bind(drum.status().as_str())
        .bind(grid)
        .bind(last_updated)
        .bind(drum.version() as i64)
        .bind(version as i64)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("update_drum", e))?,
    };

    if result.rows_affected() == 0 {
        return Err(LedgerError::Conflict(format!(
            "drum {} changed concurrently (expected {expected:?})",
            drum.id_typed()
        )));
    }
    Ok(())
}

// Grids

pub(crate) async fn load_grid(
    conn: &mut SqliteConnection,
    grid_id: &GridId,
) -> LedgerResult<Option<Grid>> {
    let row = sqlx::query(
        r#"
        SELECT GridID, Status, CurrentDrumID, Version
        FROM grids
        WHERE GridID = ?1
        "#,
    )
    .bind(grid_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_grid", e))?;

    row.map(|row| decode::<GridRow>("load_grid", &row)?.into_grid())
        .transpose()
}

/// Like `load_grid`, but an unknown id is `NotFound`.
pub(crate) async fn require_grid(
    conn: &mut SqliteConnection,
    grid_id: &GridId,
) -> LedgerResult<Grid> {
    load_grid(conn, grid_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("grid {grid_id}")))
}

pub(crate) async fn load_grids(conn: &mut SqliteConnection) -> LedgerResult<Vec<Grid>> {
    let rows = sqlx::query(
        r#"
        SELECT GridID, Status, CurrentDrumID, Version
        FROM grids
        ORDER BY GridID ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_grids", e))?;

    rows.iter()
        .map(|row| decode::<GridRow>("load_grids", row)?.into_grid())
        .collect()
}

pub(crate) async fn save_grid(
    conn: &mut SqliteConnection,
    grid: &Grid,
    expected: ExpectedVersion,
) -> LedgerResult<()> {
    let ExpectedVersion::Exact(version) = expected else {
        return Err(LedgerError::storage(
            "update_grid",
            format!("grid {} must already exist", grid.id()),
        ));
    };

    let result = sqlx::query(
        r#"
        UPDATE grids
        SET Status = ?2,
            CurrentDrumID = ?3,
            Version = ?4
        WHERE GridID = ?1 AND Version = ?5
        "#,
    )
    .bind(grid.id().as_str())
    .bind(grid.status().as_str())
    .bind(grid.current_drum().map(|d| d.as_str()))
    .bind(grid.version() as i64)
    .bind(version as i64)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_grid", e))?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::Conflict(format!(
            "grid {} changed concurrently (expected {expected:?})",
            grid.id()
        )));
    }
    Ok(())
}

/// Drums currently stored on `grid_id`, ordered by id.
pub(crate) async fn occupants(
    conn: &mut SqliteConnection,
    grid_id: &GridId,
) -> LedgerResult<Vec<DrumId>> {
    let rows = sqlx::query(
        r#"
        SELECT DrumID
        FROM drums
        WHERE Status = 'IN' AND CurrentGrid = ?1
        ORDER BY DrumID ASC
        "#,
    )
    .bind(grid_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_occupants", e))?;

    rows.iter()
        .map(|row| {
            let id: String = row
                .try_get("DrumID")
                .map_err(|e| map_sqlx_error("load_occupants", e))?;
            DrumId::parse(&id).map_err(|e| corrupt("drums", e))
        })
        .collect()
}

/// Occupants of every grid that has at least one.
pub(crate) async fn occupancy_map(
    conn: &mut SqliteConnection,
) -> LedgerResult<BTreeMap<GridId, Vec<DrumId>>> {
    let rows = sqlx::query(
        r#"
        SELECT CurrentGrid, DrumID
        FROM drums
        WHERE CurrentGrid IS NOT NULL
        ORDER BY CurrentGrid ASC, DrumID ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_occupancy", e))?;

    let mut map: BTreeMap<GridId, Vec<DrumId>> = BTreeMap::new();
    for row in &rows {
        let grid: String = row
            .try_get("CurrentGrid")
            .map_err(|e| map_sqlx_error("load_occupancy", e))?;
        let drum: String = row
            .try_get("DrumID")
            .map_err(|e| map_sqlx_error("load_occupancy", e))?;
        map.entry(GridId::parse(&grid).map_err(|e| corrupt("drums", e))?)
            .or_default()
            .push(DrumId::parse(&drum).map_err(|e| corrupt("drums", e))?);
    }
    Ok(map)
}

// Audit tables

pub(crate) async fn load_transactions(
    conn: &mut SqliteConnection,
    drum_id: Option<&DrumId>,
) -> LedgerResult<Vec<Transaction>> {
    let rows = sqlx::query(
        r#"
        SELECT TxnID, DrumID, GridID, Status, Timestamp
        FROM transactions
        WHERE (?1 IS NULL OR DrumID = ?1)
        ORDER BY TxnID ASC
        "#,
    )
    .bind(drum_id.map(|d| d.as_str()))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_transactions", e))?;

    rows.iter()
        .map(|row| decode::<TransactionRow>("load_transactions", row)?.into_transaction())
        .collect()
}

pub(crate) async fn load_history(
    conn: &mut SqliteConnection,
    order_no: Option<&str>,
) -> LedgerResult<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT HistID, DrumID, OrderNo, Quantity, RA, CellType, GridID, Timestamp
        FROM drum_history
        WHERE (?1 IS NULL OR OrderNo = ?1)
        ORDER BY HistID ASC
        "#,
    )
    .bind(order_no)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_history", e))?;

    rows.iter()
        .map(|row| decode::<HistoryRow>("load_history", row)?.into_entry())
        .collect()
}
