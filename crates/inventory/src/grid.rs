//! Storage grids and the occupancy rules that govern them.

use serde::{Deserialize, Serialize};

use drumledger_core::{DomainError, DomainResult, DrumId, Entity, GridId};

/// Row letters of the fixed storage layout.
pub const GRID_ROWS: [char; 3] = ['A', 'B', 'C'];

/// Number of columns per row.
pub const GRID_COLUMNS: u8 = 3;

/// The fixed grid set, row-major (`A1, A2, A3, B1, ..., C3`).
pub fn grid_layout() -> Vec<GridId> {
    GRID_ROWS
        .iter()
        .flat_map(|row| (1..=GRID_COLUMNS).map(move |col| GridId::at(*row, col)))
        .collect()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridStatus {
    Available,
    Occupied,
}

impl GridStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridStatus::Available => "Available",
            GridStatus::Occupied => "Occupied",
        }
    }
}

impl core::fmt::Display for GridStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for GridStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(GridStatus::Available),
            "Occupied" => Ok(GridStatus::Occupied),
            other => Err(DomainError::validation(format!("invalid grid status: {other}"))),
        }
    }
}

/// How many drums a grid may hold.
///
/// Chosen once per ledger and applied to capacity checks, status
/// recomputation and invariant audits alike.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OccupancyMode {
    /// Exactly one drum per occupied grid; the grid row names its occupant.
    #[default]
    Single,
    /// Any number of drums per grid (up to `capacity` when set); occupants
    /// are derived from the drums that reference the grid.
    Shared { capacity: Option<u32> },
}

impl OccupancyMode {
    /// Stable textual form persisted with the ledger (`single`, `shared`, `shared:4`).
    pub fn as_setting(&self) -> String {
        match self {
            OccupancyMode::Single => "single".to_string(),
            OccupancyMode::Shared { capacity: None } => "shared".to_string(),
            OccupancyMode::Shared { capacity: Some(c) } => format!("shared:{c}"),
        }
    }

    pub fn parse_setting(s: &str) -> DomainResult<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "single" => Ok(OccupancyMode::Single),
            "shared" => Ok(OccupancyMode::Shared { capacity: None }),
            other => {
                let capacity = other
                    .strip_prefix("shared:")
                    .and_then(|c| c.parse::<u32>().ok())
                    .filter(|c| *c > 0)
                    .ok_or_else(|| {
                        DomainError::validation(format!("invalid occupancy mode: {other}"))
                    })?;
                Ok(OccupancyMode::Shared {
                    capacity: Some(capacity),
                })
            }
        }
    }

    /// Maximum occupants per grid (`None` = unbounded).
    pub fn capacity(&self) -> Option<usize> {
        match self {
            OccupancyMode::Single => Some(1),
            OccupancyMode::Shared { capacity } => capacity.map(|c| c as usize),
        }
    }

    /// Fails with `Capacity` if a grid holding `occupants` drums cannot take one more.
    pub fn ensure_accepts(&self, grid: &GridId, occupants: usize) -> DomainResult<()> {
        match self.capacity() {
            Some(max) if occupants >= max => Err(DomainError::capacity(format!(
                "grid {grid} is full ({occupants}/{max})"
            ))),
            _ => Ok(()),
        }
    }

    pub fn status_for(&self, occupants: usize) -> GridStatus {
        if occupants == 0 {
            GridStatus::Available
        } else {
            GridStatus::Occupied
        }
    }

    /// Whether a grid row agrees with the drums that reference it.
    pub fn is_consistent(&self, grid: &Grid, occupants: &[DrumId]) -> bool {
        if grid.status != self.status_for(occupants.len()) {
            return false;
        }
        match self {
            OccupancyMode::Single => {
                occupants.len() <= 1 && grid.current_drum.as_ref() == occupants.first()
            }
            OccupancyMode::Shared { .. } => {
                grid.current_drum.is_none()
                    && self.capacity().is_none_or(|max| occupants.len() <= max)
            }
        }
    }
}

impl core::fmt::Display for OccupancyMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.as_setting())
    }
}

/// Entity: Grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    id: GridId,
    status: GridStatus,
    current_drum: Option<DrumId>,
    version: u64,
}

impl Grid {
    /// A freshly seeded, empty grid.
    pub fn seeded(id: GridId) -> Self {
        Self {
            id,
            status: GridStatus::Available,
            current_drum: None,
            version: 1,
        }
    }

    pub fn restore(
        id: GridId,
        status: GridStatus,
        current_drum: Option<DrumId>,
        version: u64,
    ) -> Self {
        Self {
            id,
            status,
            current_drum,
            version,
        }
    }

    pub fn status(&self) -> GridStatus {
        self.status
    }

    pub fn current_drum(&self) -> Option<&DrumId> {
        self.current_drum.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_available(&self) -> bool {
        self.status == GridStatus::Available
    }

    /// The next state of this grid given the drums that now reference it.
    pub fn recomputed(&self, mode: OccupancyMode, occupants: &[DrumId]) -> Grid {
        let current_drum = match mode {
            OccupancyMode::Single => occupants.first().cloned(),
            OccupancyMode::Shared { .. } => None,
        };
        Grid {
            id: self.id.clone(),
            status: mode.status_for(occupants.len()),
            current_drum,
            version: self.version + 1,
        }
    }
}

impl Entity for Grid {
    type Id = GridId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
