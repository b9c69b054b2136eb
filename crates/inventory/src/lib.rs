//! Drum inventory domain.
//!
//! Business rules for drums and grids, implemented purely as deterministic
//! domain logic (no IO, no storage). The infra crate loads state, lets the
//! `Drum` aggregate decide, and persists the outcome atomically.

pub mod audit;
pub mod drum;
pub mod grid;

pub use audit::{HistId, HistoryEntry, HistorySnapshot, Transaction, TxnId, TxnKind};
pub use drum::{
    Drum, DrumCommand, DrumEvent, DrumMetadata, DrumPlaced, DrumRemoved, DrumShifted, DrumState,
    DrumStatus, PlaceDrum, RemoveDrum, ShiftDrum,
};
pub use grid::{GRID_COLUMNS, GRID_ROWS, Grid, GridStatus, OccupancyMode, grid_layout};
