//! Query Layer: read-only projections over the ledger tables.
//!
//! Nothing here writes. "No results" is an empty `Vec` or `None`, never an
//! error; an id that does not normalize simply matches nothing. Projections
//! that combine several tables read them inside one transaction so they see
//! a single committed snapshot.

use serde::Serialize;

use drumledger_core::{DrumId, Entity, GridId};
use drumledger_inventory::{
    Drum, DrumStatus, GridStatus, HistoryEntry, OccupancyMode, Transaction,
};

use crate::error::{LedgerResult, map_sqlx_error};
use crate::store::{InventoryStore, rows};

/// One order-number search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchHit {
    /// A drum currently stored with this order number.
    Live(Drum),
    /// A removal snapshot; returned only when no stored drum matches.
    Historical(HistoryEntry),
}

impl SearchHit {
    pub fn drum_id(&self) -> &DrumId {
        match self {
            SearchHit::Live(drum) => drum.id_typed(),
            SearchHit::Historical(entry) => &entry.drum_id,
        }
    }

    pub fn grid_id(&self) -> Option<&GridId> {
        match self {
            SearchHit::Live(drum) => drum.current_grid(),
            SearchHit::Historical(entry) => Some(&entry.grid_id),
        }
    }

    pub fn is_historical(&self) -> bool {
        matches!(self, SearchHit::Historical(_))
    }
}

/// A grid and the drums that currently reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridOccupancy {
    pub grid_id: GridId,
    pub status: GridStatus,
    pub drum_ids: Vec<DrumId>,
}

/// A drum/grid consistency rule found broken in the stored tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Drum row whose status, location and metadata disagree.
    Drum { drum_id: String, problem: String },
    /// Grid row that does not match its occupants under the ledger's mode.
    Grid {
        grid_id: GridId,
        status: GridStatus,
        current_drum: Option<DrumId>,
        occupants: Vec<DrumId>,
    },
    /// Drum stored on a grid outside the seeded layout.
    UnknownGrid { drum_id: DrumId, grid_id: GridId },
}

impl core::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InvariantViolation::Drum { drum_id, problem } => {
                write!(f, "drum {drum_id}: {problem}")
            }
            InvariantViolation::Grid {
                grid_id,
                status,
                current_drum,
                occupants,
            } => write!(
                f,
                "grid {grid_id} is {status} (current drum {current_drum:?}) but holds {} drum(s)",
                occupants.len()
            ),
            InvariantViolation::UnknownGrid { drum_id, grid_id } => {
                write!(f, "drum {drum_id} is stored on unknown grid {grid_id}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryLayer {
    store: InventoryStore,
}

impl QueryLayer {
    pub(crate) fn new(store: InventoryStore) -> Self {
        Self { store }
    }

    pub fn mode(&self) -> OccupancyMode {
        self.store.mode()
    }

    /// Current state of one drum; `None` if the ledger has never seen it.
    pub async fn drum(&self, drum_id: &str) -> LedgerResult<Option<Drum>> {
        let Ok(drum_id) = DrumId::parse(drum_id) else {
            return Ok(None);
        };
        let mut conn = self.connection("drum").await?;
        rows::load_drum(&mut conn, &drum_id).await
    }

    /// Every drum the ledger knows, IN or OUT, ordered by id.
    pub async fn drums(&self) -> LedgerResult<Vec<Drum>> {
        let mut conn = self.connection("drums").await?;
        rows::load_drums(&mut conn).await
    }

    /// Exact, case-sensitive order number search.
    ///
    /// Stored drums win; when none match, removal snapshots with the same
    /// order number are returned instead, oldest first.
    pub async fn search_by_order(&self, order_no: &str) -> LedgerResult<Vec<SearchHit>> {
        let order_no = order_no.trim();
        if order_no.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.store.begin("search_by_order").await?;
        let live = rows::drums_by_order(&mut tx, order_no).await?;
        if !live.is_empty() {
            return Ok(live.into_iter().map(SearchHit::Live).collect());
        }

        let history = rows::load_history(&mut tx, Some(order_no)).await?;
        Ok(history.into_iter().map(SearchHit::Historical).collect())
    }

    /// Every grid in layout order with its status and occupants.
    pub async fn grid_occupancy(&self) -> LedgerResult<Vec<GridOccupancy>> {
        let mut tx = self.store.begin("grid_occupancy").await?;
        let grids = rows::load_grids(&mut tx).await?;
        let mut occupancy = rows::occupancy_map(&mut tx).await?;

        Ok(grids
            .into_iter()
            .map(|grid| GridOccupancy {
                drum_ids: occupancy.remove(grid.id()).unwrap_or_default(),
                status: grid.status(),
                grid_id: grid.id().clone(),
            })
            .collect())
    }

    /// Grids that are currently `Available`, in layout order.
    pub async fn available_grids(&self) -> LedgerResult<Vec<GridId>> {
        let mut conn = self.connection("available_grids").await?;
        Ok(rows::load_grids(&mut conn)
            .await?
            .into_iter()
            .filter(|grid| grid.is_available())
            .map(|grid| grid.id().clone())
            .collect())
    }

    /// All removal snapshots, oldest first.
    pub async fn history(&self) -> LedgerResult<Vec<HistoryEntry>> {
        let mut conn = self.connection("history").await?;
        rows::load_history(&mut conn, None).await
    }

    /// The audit transaction stream, oldest first, optionally for one drum.
    pub async fn transactions(&self, drum_id: Option<&str>) -> LedgerResult<Vec<Transaction>> {
        let drum_id = match drum_id.map(DrumId::parse) {
            None => None,
            Some(Ok(id)) => Some(id),
            Some(Err(_)) => return Ok(Vec::new()),
        };
        let mut conn = self.connection("transactions").await?;
        rows::load_transactions(&mut conn, drum_id.as_ref()).await
    }

    /// Re-derive the drum and grid invariants from the stored rows.
    ///
    /// Returns every violation found; an empty list means the ledger is
    /// consistent under its occupancy mode.
    pub async fn check_invariants(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let mode = self.store.mode();
        let mut tx = self.store.begin("check_invariants").await?;
        let drum_rows = rows::load_drum_rows(&mut tx).await?;
        let grids = rows::load_grids(&mut tx).await?;
        let mut occupancy = rows::occupancy_map(&mut tx).await?;

        let mut violations = Vec::new();

        for row in &drum_rows {
            let problem = match (row.status.parse::<DrumStatus>(), &row.current_grid) {
                (Ok(DrumStatus::In), None) => Some("IN without a grid".to_string()),
                (Ok(DrumStatus::Out), Some(grid)) => Some(format!("OUT but still on grid {grid}")),
                (Ok(DrumStatus::Out), None) if row.has_metadata() => {
                    Some("OUT but still carries metadata".to_string())
                }
                (Ok(DrumStatus::In), Some(_)) => row
                    .clone()
                    .into_drum()
                    .err()
                    .map(|e| format!("unreadable stored drum: {e}")),
                (Ok(DrumStatus::Out), None) => None,
                (Err(e), _) => Some(e.to_string()),
            };
            if let Some(problem) = problem {
                violations.push(InvariantViolation::Drum {
                    drum_id: row.drum_id.clone(),
                    problem,
                });
            }
        }

        for grid in &grids {
            let occupants = occupancy.remove(grid.id()).unwrap_or_default();
            if !mode.is_consistent(grid, &occupants) {
                violations.push(InvariantViolation::Grid {
                    grid_id: grid.id().clone(),
                    status: grid.status(),
                    current_drum: grid.current_drum().cloned(),
                    occupants,
                });
            }
        }

        // Whatever is left references a grid with no row.
        for (grid_id, drums) in occupancy {
            for drum_id in drums {
                violations.push(InvariantViolation::UnknownGrid {
                    drum_id,
                    grid_id: grid_id.clone(),
                });
            }
        }

        Ok(violations)
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
}
