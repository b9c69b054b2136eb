//! Administration: the destructive ledger Reset.
//!
//! Reset is two-step: `arm_reset(true)` hands back an [`ArmedReset`], and
//! only that handle can run it. Execution takes the exclusive side of the
//! gate shared with the Transition Engine, so no transition is in flight
//! while tables are cleared.
//!
//! Audit ids keep counting after a reset (`AUTOINCREMENT` sequences are not
//! cleared), so a `TxnID` never names two different events.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use drumledger_inventory::grid_layout;

use crate::error::{LedgerError, LedgerResult, map_sqlx_error};
use crate::store::{InventoryStore, schema};

/// Rows removed by a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub drums_cleared: u64,
    pub transactions_cleared: u64,
    pub history_cleared: u64,
    pub grids_seeded: usize,
}

#[derive(Debug, Clone)]
pub struct Administration {
    store: InventoryStore,
    gate: Arc<RwLock<()>>,
}

impl Administration {
    pub(crate) fn new(store: InventoryStore, gate: Arc<RwLock<()>>) -> Self {
        Self { store, gate }
    }

    /// First step of a reset; `confirm` must be `true`.
    pub fn arm_reset(&self, confirm: bool) -> LedgerResult<ArmedReset<'_>> {
        if !confirm {
            return Err(LedgerError::Validation(
                "reset requires explicit confirmation".to_string(),
            ));
        }
        Ok(ArmedReset { admin: self })
    }
}

/// A confirmed reset, ready to run. Consumed by [`ArmedReset::execute`].
#[derive(Debug)]
#[must_use = "an armed reset does nothing until executed"]
pub struct ArmedReset<'a> {
    admin: &'a Administration,
}

impl ArmedReset<'_> {
    /// Clear drums, transactions and history, then re-seed every grid as `Available`.
    #[instrument(skip(self), err)]
    pub async fn execute(self) -> LedgerResult<ResetSummary> {
        let _exclusive = self.admin.gate.write().await;
        let mut tx = self.admin.store.begin("reset").await?;

        let mut cleared = [0u64; 3];
        for (slot, table) in cleared
            .iter_mut()
            .zip(["drums", "transactions", "drum_history"])
        {
            *slot = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("reset", e))?
                .rows_affected();
        }

        sqlx::query("DELETE FROM grids")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("reset", e))?;
        schema::seed_grids(&mut tx).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("reset", e))?;

        let [drums_cleared, transactions_cleared, history_cleared] = cleared;
        let summary = ResetSummary {
            drums_cleared,
            transactions_cleared,
            history_cleared,
            grids_seeded: grid_layout().len(),
        };
        warn!(
            drums = summary.drums_cleared,
            transactions = summary.transactions_cleared,
            history = summary.history_cleared,
            "ledger reset: all drums, transactions and history cleared"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    use drumledger_inventory::{DrumMetadata, GridStatus, OccupancyMode};

    use crate::config::LedgerConfig;
    use crate::engine::TransitionEngine;
    use crate::query::QueryLayer;

    async fn ledger() -> (TransitionEngine, QueryLayer, Administration) {
        let (engine, queries, admin, _) = ledger_with_gate().await;
        (engine, queries, admin)
    }

    async fn ledger_with_gate() -> (TransitionEngine, QueryLayer, Administration, Arc<RwLock<()>>) {
        let store = InventoryStore::open(&LedgerConfig::in_memory(OccupancyMode::Single))
            .await
            .unwrap();
        let gate = Arc::new(RwLock::new(()));
        (
            TransitionEngine::new(store.clone(), gate.clone()),
            QueryLayer::new(store.clone()),
            Administration::new(store, gate.clone()),
            gate,
        )
    }

    fn metadata() -> DrumMetadata {
        DrumMetadata::new("O1", "10", "R1", "TypeA").unwrap()
    }

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn unconfirmed_reset_is_refused() {
        let (_, _, admin) = ledger().await;
        let err = admin.arm_reset(false).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn reset_clears_state_but_not_the_id_sequence() {
        let (engine, queries, admin) = ledger().await;
        let metadata = DrumMetadata::new("O1", "10", "R1", "TypeA").unwrap();
        engine.place_drum("D001", "A1", metadata.clone()).await.unwrap();
        let last = engine.remove_drum("D001").await.unwrap();

        let summary = admin.arm_reset(true).unwrap().execute().await.unwrap();
        assert_eq!(summary.drums_cleared, 1);
        assert_eq!(summary.transactions_cleared, 2);
        assert_eq!(summary.history_cleared, 1);
        assert_eq!(summary.grids_seeded, 9);

        assert!(queries.drums().await.unwrap().is_empty());
        assert!(queries.history().await.unwrap().is_empty());
        assert!(queries.transactions(None).await.unwrap().is_empty());
        let view = queries.grid_occupancy().await.unwrap();
        assert!(view.iter().all(|g| g.status == GridStatus::Available));

        let next = engine.place_drum("D001", "A1", metadata).await.unwrap();
        assert!(next.txn_id > last.txn_id);
    }

    #[tokio::test]
    async fn reset_waits_for_in_flight_transitions() {
        let (engine, queries, admin, gate) = ledger_with_gate().await;
        engine.place_drum("D001", "A1", metadata()).await.unwrap();

        let in_flight = gate.read().await;
        let blocked = timeout(WAIT, admin.arm_reset(true).unwrap().execute()).await;
        assert!(blocked.is_err(), "reset ran while a transition held the gate");
        assert!(queries.drum("D001").await.unwrap().is_some());

        drop(in_flight);
        let summary = timeout(WAIT, admin.arm_reset(true).unwrap().execute())
            .await
            .expect("reset still blocked after the gate was released")
            .unwrap();
        assert_eq!(summary.drums_cleared, 1);
    }

    #[tokio::test]
    async fn transitions_wait_for_a_running_reset() {
        let (engine, queries, _, gate) = ledger_with_gate().await;

        let resetting = gate.write().await;
        let blocked = timeout(WAIT, engine.place_drum("D001", "A1", metadata())).await;
        assert!(blocked.is_err(), "placement ran during a reset");
        assert!(queries.transactions(None).await.unwrap().is_empty());

        drop(resetting);
        timeout(WAIT, engine.place_drum("D001", "A1", metadata()))
            .await
            .expect("placement still blocked after the reset finished")
            .unwrap();
        assert_eq!(queries.transactions(None).await.unwrap().len(), 1);
    }
}
