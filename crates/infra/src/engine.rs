//! Transition Engine: the only writer of drum and grid state.
//!
//! Every operation follows the same pipeline inside one SQLite transaction:
//!
//! ```text
//! normalize ids
//!   ↓
//! load drum (or an empty OUT drum) and the grids involved
//!   ↓
//! Drum::handle(command) -> events      (pure decision)
//!   ↓
//! capacity check on the destination grid
//!   ↓
//! apply events, CAS-write drum row, recompute touched grids,
//! append history (removals) and one audit transaction
//!   ↓
//! commit
//! ```
//!
//! Any error before `commit` drops the transaction and rolls back every write.
//! Operations hold the shared side of the administration gate so a Reset never
//! interleaves with them.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteConnection;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use drumledger_core::{Aggregate, AggregateRoot, DomainError, DrumId, ExpectedVersion, GridId};
use drumledger_inventory::{
    Drum, DrumCommand, DrumMetadata, OccupancyMode, PlaceDrum, RemoveDrum, ShiftDrum, Transaction,
};

use crate::audit;
use crate::error::{LedgerError, LedgerResult, map_sqlx_error};
use crate::store::{InventoryStore, rows};

/// Outcome for one drum inside a batch operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub drum_id: DrumId,
    pub result: LedgerResult<Transaction>,
}

/// Per-drum report of a batch removal or shift.
///
/// Each drum is processed as its own atomic operation, so a report can mix
/// successes and failures.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub grid_id: GridId,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    fn empty(grid_id: GridId) -> Self {
        Self {
            grid_id,
            outcomes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &Transaction> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DrumId, &LedgerError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.drum_id, e)))
    }

    /// Every drum in the batch was processed successfully.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

#[derive(Debug, Clone)]
pub struct TransitionEngine {
    store: InventoryStore,
    gate: Arc<RwLock<()>>,
}

impl TransitionEngine {
    pub(crate) fn new(store: InventoryStore, gate: Arc<RwLock<()>>) -> Self {
        Self { store, gate }
    }

    pub fn mode(&self) -> OccupancyMode {
        self.store.mode()
    }

    /// Place an OUT (or never seen) drum on a grid with fresh metadata.
    #[instrument(skip(self, metadata), fields(drum_id = %drum_id, grid_id = %grid_id), err)]
    pub async fn place_drum(
        &self,
        drum_id: &str,
        grid_id: &str,
        metadata: DrumMetadata,
    ) -> LedgerResult<Transaction> {
        let drum_id = DrumId::parse(drum_id)?;
        let grid_id = GridId::parse(grid_id)?;
        let metadata = metadata.normalized()?;

        let command = DrumCommand::Place(PlaceDrum {
            drum_id: drum_id.clone(),
            grid_id,
            metadata,
            occurred_at: Utc::now(),
        });
        self.observe("place_drum", self.execute(&drum_id, command).await)
    }

    /// Take a stored drum out, archiving its metadata to history.
    #[instrument(skip(self), fields(drum_id = %drum_id), err)]
    pub async fn remove_drum(&self, drum_id: &str) -> LedgerResult<Transaction> {
        let drum_id = DrumId::parse(drum_id)?;
        self.remove(&drum_id).await
    }

    /// Move a stored drum to another grid; metadata is untouched.
    #[instrument(skip(self), fields(drum_id = %drum_id, to_grid = %to_grid), err)]
    pub async fn shift_drum(&self, drum_id: &str, to_grid: &str) -> LedgerResult<Transaction> {
        let drum_id = DrumId::parse(drum_id)?;
        let to_grid = GridId::parse(to_grid)?;
        self.shift(&drum_id, &to_grid).await
    }

    /// Remove every drum currently on `grid_id`, one atomic removal per drum.
    #[instrument(skip(self), fields(grid_id = %grid_id))]
    pub async fn batch_remove(&self, grid_id: &str) -> LedgerResult<BatchReport> {
        let grid_id = GridId::parse(grid_id)?;
        let drums = self.occupants_of(&grid_id).await?;

        let mut report = BatchReport::empty(grid_id);
        for drum_id in drums {
            let result = self.remove(&drum_id).await;
            report.outcomes.push(BatchOutcome { drum_id, result });
        }

        info!(
            grid_id = %report.grid_id,
            removed = report.succeeded().count(),
            failed = report.failures().count(),
            "batch remove finished"
        );
        Ok(report)
    }

    /// Shift every drum on `from_grid` to `to_grid`, one atomic shift per drum.
    ///
    /// Once the destination fills up, the remaining drums fail with `Capacity`
    /// and stay where they are.
    #[instrument(skip(self), fields(from_grid = %from_grid, to_grid = %to_grid))]
    pub async fn batch_shift(&self, from_grid: &str, to_grid: &str) -> LedgerResult<BatchReport> {
        let from_grid = GridId::parse(from_grid)?;
        let to_grid = GridId::parse(to_grid)?;
        if from_grid == to_grid {
            return Err(LedgerError::InvalidState(format!(
                "cannot shift grid {from_grid} onto itself"
            )));
        }

        let drums = self.occupants_of(&from_grid).await?;
        {
            let mut conn = self.connection("batch_shift").await?;
            rows::require_grid(&mut conn, &to_grid).await?;
        }

        let mut report = BatchReport::empty(from_grid);
        for drum_id in drums {
            let result = self.shift(&drum_id, &to_grid).await;
            report.outcomes.push(BatchOutcome { drum_id, result });
        }

        info!(
            grid_id = %report.grid_id,
            to_grid = %to_grid,
            shifted = report.succeeded().count(),
            failed = report.failures().count(),
            "batch shift finished"
        );
        Ok(report)
    }

    async fn remove(&self, drum_id: &DrumId) -> LedgerResult<Transaction> {
        let command = DrumCommand::Remove(RemoveDrum {
            drum_id: drum_id.clone(),
            occurred_at: Utc::now(),
        });
        self.observe("remove_drum", self.execute(drum_id, command).await)
    }

    async fn shift(&self, drum_id: &DrumId, to_grid: &GridId) -> LedgerResult<Transaction> {
        let command = DrumCommand::Shift(ShiftDrum {
            drum_id: drum_id.clone(),
            to_grid: to_grid.clone(),
            occurred_at: Utc::now(),
        });
        self.observe("shift_drum", self.execute(drum_id, command).await)
    }

    /// Current occupants of an existing grid; unknown grid is `NotFound`.
    async fn occupants_of(&self, grid_id: &GridId) -> LedgerResult<Vec<DrumId>> {
        let mut conn = self.connection("load_occupants").await?;
        rows::require_grid(&mut conn, grid_id).await?;
        rows::occupants(&mut conn, grid_id).await
    }

    async fn connection(
        &self,
        operation: &str,
    ) -> LedgerResult<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.store
            .pool()
            .acquire()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    /// Run one command as a single atomic unit.
    async fn execute(&self, drum_id: &DrumId, command: DrumCommand) -> LedgerResult<Transaction> {
        let _shared = self.gate.read().await;
        let mut tx = self.store.begin("begin_transition").await?;

        // Destination must be a seeded grid before the drum is consulted.
        if let DrumCommand::Place(PlaceDrum { grid_id, .. })
        | DrumCommand::Shift(ShiftDrum { to_grid: grid_id, .. }) = &command
        {
            rows::require_grid(&mut tx, grid_id).await?;
        }

        let mut drum = rows::load_drum(&mut tx, drum_id)
            .await?
            .unwrap_or_else(|| Drum::empty(drum_id.clone()));
        let events = drum.handle(&command)?;

        let mut recorded = None;
        for event in &events {
            if let Some(grid_id) = event.occupied_grid() {
                self.ensure_capacity(&mut tx, grid_id).await?;
            }

            let expected = ExpectedVersion::of(drum.version());
            drum.apply(event);
            rows::save_drum(&mut tx, &drum, expected).await?;

            for grid_id in event.vacated_grid().into_iter().chain(event.occupied_grid()) {
                self.refresh_grid(&mut tx, grid_id).await?;
            }
            if let Some(snapshot) = event.history_snapshot() {
                audit::append_history(&mut tx, &snapshot).await?;
            }
            recorded = Some(audit::append_transaction(&mut tx, event).await?);
        }

        let transaction = recorded.ok_or_else(|| {
            LedgerError::storage("execute", format!("no events produced for drum {drum_id}"))
        })?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transition", e))?;
        Ok(transaction)
    }

    /// Fails with `Capacity` if `grid_id` cannot take another drum.
    async fn ensure_capacity(
        &self,
        conn: &mut SqliteConnection,
        grid_id: &GridId,
    ) -> LedgerResult<()> {
        let mode = self.store.mode();
        let grid = rows::require_grid(conn, grid_id).await?;
        let occupants = rows::occupants(conn, grid_id).await?;

        if mode == OccupancyMode::Single && !grid.is_available() {
            return Err(DomainError::capacity(format!("grid {grid_id} is occupied")).into());
        }
        mode.ensure_accepts(grid_id, occupants.len())?;
        Ok(())
    }

    /// Re-derive a grid row from the drums that now reference it.
    async fn refresh_grid(&self, conn: &mut SqliteConnection, grid_id: &GridId) -> LedgerResult<()> {
        let grid = rows::require_grid(conn, grid_id).await?;
        let occupants = rows::occupants(conn, grid_id).await?;
        let next = grid.recomputed(self.store.mode(), &occupants);
        rows::save_grid(conn, &next, ExpectedVersion::Exact(grid.version())).await
    }

    fn observe(
        &self,
        operation: &'static str,
        result: LedgerResult<Transaction>,
    ) -> LedgerResult<Transaction> {
        match &result {
            Ok(txn) => info!(
                operation,
                drum_id = %txn.drum_id,
                grid_id = %txn.grid_id,
                txn_id = %txn.txn_id,
                kind = %txn.kind,
                "transition committed"
            ),
            Err(err) if err.is_retryable() => {
                warn!(operation, error = %err, "transition lost a concurrent write race")
            }
            Err(_) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drumledger_inventory::{DrumStatus, GridStatus, TxnKind};

    use crate::config::LedgerConfig;

    async fn engine(mode: OccupancyMode) -> TransitionEngine {
        let store = InventoryStore::open(&LedgerConfig::in_memory(mode))
            .await
            .unwrap();
        TransitionEngine::new(store, Arc::new(RwLock::new(())))
    }

    fn metadata() -> DrumMetadata {
        DrumMetadata::new("O1", "10", "R1", "TypeA").unwrap()
    }

    async fn grid_status(engine: &TransitionEngine, grid: &str) -> GridStatus {
        let mut conn = engine.connection("test").await.unwrap();
        rows::require_grid(&mut conn, &GridId::parse(grid).unwrap())
            .await
            .unwrap()
            .status()
    }

    async fn txn_count(engine: &TransitionEngine) -> usize {
        let mut conn = engine.connection("test").await.unwrap();
        rows::load_transactions(&mut conn, None).await.unwrap().len()
    }

    #[tokio::test]
    async fn ids_are_normalized_before_use() {
        let engine = engine(OccupancyMode::Single).await;
        let txn = engine.place_drum("  d001 ", "a1", metadata()).await.unwrap();

        assert_eq!(txn.drum_id.as_str(), "D001");
        assert_eq!(txn.grid_id.as_str(), "A1");
        assert_eq!(txn.kind, TxnKind::In);
    }

    #[tokio::test]
    async fn blank_ids_and_missing_fields_are_validation_errors() {
        let engine = engine(OccupancyMode::Single).await;

        let err = engine.place_drum("   ", "A1", metadata()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let incomplete = DrumMetadata {
            order_no: "O1".into(),
            quantity: "".into(),
            ra: "R1".into(),
            cell_type: "TypeA".into(),
        };
        let err = engine.place_drum("D001", "A1", incomplete).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(txn_count(&engine).await, 0);
    }

    #[tokio::test]
    async fn unknown_grid_is_not_found() {
        let engine = engine(OccupancyMode::Single).await;
        let err = engine.place_drum("D001", "Z9", metadata()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn single_mode_rejects_a_second_drum_on_a_grid() {
        let engine = engine(OccupancyMode::Single).await;
        engine.place_drum("D001", "A1", metadata()).await.unwrap();

        let err = engine.place_drum("D002", "A1", metadata()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Capacity(_)));

        engine.place_drum("D002", "A2", metadata()).await.unwrap();
        let err = engine.shift_drum("D002", "A1").await.unwrap_err();
        assert!(matches!(err, LedgerError::Capacity(_)));
        assert_eq!(txn_count(&engine).await, 2);
    }

    #[tokio::test]
    async fn shared_mode_honours_the_capacity_limit() {
        let engine = engine(OccupancyMode::Shared { capacity: Some(2) }).await;
        engine.place_drum("D001", "B1", metadata()).await.unwrap();
        engine.place_drum("D002", "B1", metadata()).await.unwrap();

        let err = engine.place_drum("D003", "B1", metadata()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Capacity(_)));
        assert_eq!(grid_status(&engine, "B1").await, GridStatus::Occupied);
    }

    #[tokio::test]
    async fn shifting_recomputes_the_vacated_grid_in_shared_mode() {
        let engine = engine(OccupancyMode::Shared { capacity: None }).await;
        engine.place_drum("D001", "C1", metadata()).await.unwrap();
        engine.place_drum("D002", "C1", metadata()).await.unwrap();

        engine.shift_drum("D001", "C2").await.unwrap();
        assert_eq!(grid_status(&engine, "C1").await, GridStatus::Occupied);

        engine.shift_drum("D002", "C2").await.unwrap();
        assert_eq!(grid_status(&engine, "C1").await, GridStatus::Available);
    }

    #[tokio::test]
    async fn removing_an_out_drum_writes_nothing() {
        let engine = engine(OccupancyMode::Single).await;
        engine.place_drum("D001", "A1", metadata()).await.unwrap();
        engine.remove_drum("D001").await.unwrap();
        let before = txn_count(&engine).await;

        let err = engine.remove_drum("D001").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(txn_count(&engine).await, before);

        let err = engine.remove_drum("D404").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn a_removed_drum_can_be_placed_again() {
        let engine = engine(OccupancyMode::Single).await;
        engine.place_drum("D001", "A1", metadata()).await.unwrap();
        engine.remove_drum("D001").await.unwrap();

        let fresh = DrumMetadata::new("O2", "5", "R9", "TypeB").unwrap();
        engine.place_drum("D001", "C3", fresh.clone()).await.unwrap();

        let mut conn = engine.connection("test").await.unwrap();
        let drum = rows::load_drum(&mut conn, &DrumId::parse("D001").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drum.status(), DrumStatus::In);
        assert_eq!(drum.metadata(), Some(&fresh));
        assert_eq!(drum.version(), 3);
    }

    #[tokio::test]
    async fn batch_on_unknown_or_empty_grid() {
        let engine = engine(OccupancyMode::Single).await;

        let err = engine.batch_remove("Q7").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let report = engine.batch_remove("B3").await.unwrap();
        assert!(report.is_empty());
        assert!(report.is_complete());

        let err = engine.batch_shift("A1", "a1").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn batch_shift_reports_drums_that_did_not_fit() {
        let engine = engine(OccupancyMode::Shared { capacity: Some(2) }).await;
        engine.place_drum("D001", "A1", metadata()).await.unwrap();
        engine.place_drum("D002", "A1", metadata()).await.unwrap();
        engine.place_drum("D003", "B1", metadata()).await.unwrap();

        let report = engine.batch_shift("A1", "B1").await.unwrap();

        assert!(!report.is_complete());
        let moved: Vec<&str> = report.succeeded().map(|t| t.drum_id.as_str()).collect();
        assert_eq!(moved, vec!["D001"]);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.as_str(), "D002");
        assert!(matches!(failed[0].1, LedgerError::Capacity(_)));

        // D002 stayed behind, so A1 is still occupied.
        assert_eq!(grid_status(&engine, "A1").await, GridStatus::Occupied);
    }
}
