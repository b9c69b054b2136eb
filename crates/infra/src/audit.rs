//! Audit Log writer.
//!
//! Both functions take the connection of an open `sqlx::Transaction`; audit
//! rows commit or roll back together with the state change they describe.

use sqlx::SqliteConnection;

use drumledger_inventory::{DrumEvent, HistId, HistoryEntry, HistorySnapshot, Transaction, TxnId};

use crate::error::{LedgerResult, map_sqlx_error};

/// Append the IN/OUT/SHIFT record for `event` and return it with its `TxnID`.
pub(crate) async fn append_transaction(
    conn: &mut SqliteConnection,
    event: &DrumEvent,
) -> LedgerResult<Transaction> {
    let timestamp = event.occurred_at();
    let result = sqlx::query(
        r#"
        INSERT INTO transactions (DrumID, GridID, Status, Timestamp)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(event.drum_id().as_str())
    .bind(event.recorded_grid().as_str())
    .bind(event.kind().as_str())
    .bind(timestamp)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("append_transaction", e))?;

    Ok(Transaction {
        txn_id: TxnId(result.last_insert_rowid()),
        drum_id: event.drum_id().clone(),
        grid_id: event.recorded_grid().clone(),
        kind: event.kind(),
        timestamp,
    })
}

/// Archive the metadata a drum carried immediately before removal.
pub(crate) async fn append_history(
    conn: &mut SqliteConnection,
    snapshot: &HistorySnapshot,
) -> LedgerResult<HistoryEntry> {
    let result = sqlx::query(
        r#"
        INSERT INTO drum_history (DrumID, OrderNo, Quantity, RA, CellType, Status, GridID, Timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, 'OUT', ?6, ?7)
        "#,
    )
    .bind(snapshot.drum_id.as_str())
    .bind(snapshot.metadata.order_no.as_str())
    .bind(snapshot.metadata.quantity.as_str())
    .bind(snapshot.metadata.ra.as_str())
    .bind(snapshot.metadata.cell_type.as_str())
    .bind(snapshot.grid_id.as_str())
    .bind(snapshot.taken_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("append_history", e))?;

    Ok(HistoryEntry {
        hist_id: HistId(result.last_insert_rowid()),
        drum_id: snapshot.drum_id.clone(),
        metadata: snapshot.metadata.clone(),
        grid_id: snapshot.grid_id.clone(),
        timestamp: snapshot.taken_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use drumledger_core::{DrumId, GridId};
    use drumledger_inventory::{DrumMetadata, DrumShifted, OccupancyMode, TxnKind};

    use crate::config::LedgerConfig;
    use crate::store::{InventoryStore, rows};

    #[tokio::test]
    async fn rolled_back_audit_rows_leave_no_trace() {
        let store = InventoryStore::open(&LedgerConfig::in_memory(OccupancyMode::Single))
            .await
            .unwrap();
        let event = DrumEvent::Shifted(DrumShifted {
            drum_id: DrumId::parse("D001").unwrap(),
            from_grid: GridId::parse("A1").unwrap(),
            to_grid: GridId::parse("B2").unwrap(),
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        });

        let mut tx = store.begin("test").await.unwrap();
        let txn = append_transaction(&mut tx, &event).await.unwrap();
        assert_eq!(txn.kind, TxnKind::Shift);
        assert_eq!(txn.grid_id.as_str(), "B2");
        drop(tx);

        let mut conn = store.pool().acquire().await.unwrap();
        assert!(rows::load_transactions(&mut conn, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_rows_are_read_back_in_order() {
        let store = InventoryStore::open(&LedgerConfig::in_memory(OccupancyMode::Single))
            .await
            .unwrap();
        let mut tx = store.begin("test").await.unwrap();
        for (drum, grid) in [("D001", "A1"), ("D002", "C3")] {
            let snapshot = HistorySnapshot {
                drum_id: DrumId::parse(drum).unwrap(),
                metadata: DrumMetadata::new("O1", "10", "R1", "TypeA").unwrap(),
                grid_id: GridId::parse(grid).unwrap(),
                taken_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            };
            append_history(&mut tx, &snapshot).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut conn = store.pool().acquire().await.unwrap();
        let history = rows::load_history(&mut conn, Some("O1")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].hist_id < history[1].hist_id);
        assert_eq!(history[1].grid_id.as_str(), "C3");
        assert!(rows::load_history(&mut conn, Some("o1")).await.unwrap().is_empty());
    }
}
