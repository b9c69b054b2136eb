//! Table definitions and the fixed grid seed.
//!
//! Statements are idempotent so opening an existing ledger is a no-op. The
//! `drums` CHECK constraint mirrors the drum invariant: a row is IN exactly
//! when it names a grid, and an OUT row carries no metadata.

use sqlx::SqliteConnection;

use drumledger_inventory::{Grid, grid_layout};

use crate::error::{LedgerResult, map_sqlx_error};

pub(crate) const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ledger_settings (
        Key   TEXT PRIMARY KEY,
        Value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS grids (
        GridID        TEXT PRIMARY KEY,
        Status        TEXT NOT NULL CHECK (Status IN ('Available', 'Occupied')),
        CurrentDrumID TEXT NULL,
        Version       INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS drums (
        DrumID      TEXT PRIMARY KEY,
        OrderNo     TEXT NULL,
        Quantity    TEXT NULL,
        RA          TEXT NULL,
        CellType    TEXT NULL,
        Status      TEXT NOT NULL CHECK (Status IN ('IN', 'OUT')),
        CurrentGrid TEXT NULL REFERENCES grids (GridID),
        LastUpdated TEXT NOT NULL,
        Version     INTEGER NOT NULL,
        CHECK ((Status = 'IN') = (CurrentGrid IS NOT NULL)),
        CHECK (Status = 'IN' OR (OrderNo IS NULL AND Quantity IS NULL AND RA IS NULL AND CellType IS NULL))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS drums_current_grid ON drums (CurrentGrid)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS drums_order_no ON drums (OrderNo)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        TxnID     INTEGER PRIMARY KEY AUTOINCREMENT,
        DrumID    TEXT NOT NULL,
        GridID    TEXT NOT NULL,
        Status    TEXT NOT NULL CHECK (Status IN ('IN', 'OUT', 'SHIFT')),
        Timestamp TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS drum_history (
        HistID    INTEGER PRIMARY KEY AUTOINCREMENT,
        DrumID    TEXT NOT NULL,
        OrderNo   TEXT NOT NULL,
        Quantity  TEXT NOT NULL,
        RA        TEXT NOT NULL,
        CellType  TEXT NOT NULL,
        Status    TEXT NOT NULL CHECK (Status = 'OUT'),
        GridID    TEXT NOT NULL,
        Timestamp TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS drum_history_order_no ON drum_history (OrderNo)
    "#,
];

/// Create all tables (if missing) and seed the fixed grid set.
pub(crate) async fn ensure_schema(conn: &mut SqliteConnection) -> LedgerResult<()> {
    for statement in SCHEMA.iter().copied() {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("create_schema", e))?;
    }
    seed_grids(conn).await
}

/// Insert every grid of the fixed layout as `Available` unless it already exists.
pub(crate) async fn seed_grids(conn: &mut SqliteConnection) -> LedgerResult<()> {
    for grid_id in grid_layout() {
        let grid = Grid::seeded(grid_id.clone());
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO grids (GridID, Status, CurrentDrumID, Version)
            VALUES (?1, ?2, NULL, ?3)
            "#,
        )
        .bind(grid_id.as_str())
        .bind(grid.status().as_str())
        .bind(grid.version() as i64)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("seed_grids", e))?;
    }
    Ok(())
}
