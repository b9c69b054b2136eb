use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drumledger_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, DrumId, GridId,
};

use crate::audit::{HistorySnapshot, TxnKind};

/// Descriptive data recorded when a drum is placed.
///
/// All four fields are required; they are cleared from the live drum record
/// on removal and survive only in history snapshots. Compared by value: a
/// shift must leave them exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumMetadata {
    pub order_no: String,
    pub quantity: String,
    pub ra: String,
    pub cell_type: String,
}

impl DrumMetadata {
    /// Build metadata from operator input, trimming every field.
    ///
    /// Fails with a validation error naming every missing field.
    pub fn new(
        order_no: impl Into<String>,
        quantity: impl Into<String>,
        ra: impl Into<String>,
        cell_type: impl Into<String>,
    ) -> DomainResult<Self> {
        let metadata = Self {
            order_no: order_no.into().trim().to_string(),
            quantity: quantity.into().trim().to_string(),
            ra: ra.into().trim().to_string(),
            cell_type: cell_type.into().trim().to_string(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Re-run `new` over values that may have bypassed it (struct literals, serde).
    pub fn normalized(self) -> DomainResult<Self> {
        Self::new(self.order_no, self.quantity, self.ra, self.cell_type)
    }

    pub fn validate(&self) -> DomainResult<()> {
        let missing: Vec<&str> = [
            ("order_no", &self.order_no),
            ("quantity", &self.quantity),
            ("ra", &self.ra),
            ("cell_type", &self.cell_type),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "missing required drum fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Persisted drum status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrumStatus {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl DrumStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrumStatus::In => "IN",
            DrumStatus::Out => "OUT",
        }
    }
}

impl core::fmt::Display for DrumStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for DrumStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(DrumStatus::In),
            "OUT" => Ok(DrumStatus::Out),
            other => Err(DomainError::validation(format!("invalid drum status: {other}"))),
        }
    }
}

/// Where a drum is, and what is known about it while it is there.
///
/// A stored drum always has both a grid and metadata; an OUT drum has neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrumState {
    Stored { grid: GridId, metadata: DrumMetadata },
    Out,
}

/// Aggregate root: Drum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drum {
    id: DrumId,
    state: DrumState,
    last_updated: Option<DateTime<Utc>>,
    version: u64,
}

impl Drum {
    /// A drum the ledger has never seen (OUT, version 0).
    pub fn empty(id: DrumId) -> Self {
        Self {
            id,
            state: DrumState::Out,
            last_updated: None,
            version: 0,
        }
    }

    /// Rebuild a drum from its stored row.
    pub fn restore(
        id: DrumId,
        state: DrumState,
        last_updated: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            id,
            state,
            last_updated,
            version,
        }
    }

    pub fn id_typed(&self) -> &DrumId {
        &self.id
    }

    pub fn state(&self) -> &DrumState {
        &self.state
    }

    pub fn status(&self) -> DrumStatus {
        match self.state {
            DrumState::Stored { .. } => DrumStatus::In,
            DrumState::Out => DrumStatus::Out,
        }
    }

    pub fn current_grid(&self) -> Option<&GridId> {
        match &self.state {
            DrumState::Stored { grid, .. } => Some(grid),
            DrumState::Out => None,
        }
    }

    pub fn metadata(&self) -> Option<&DrumMetadata> {
        match &self.state {
            DrumState::Stored { metadata, .. } => Some(metadata),
            DrumState::Out => None,
        }
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Whether the ledger has a row for this drum.
    pub fn exists(&self) -> bool {
        self.version > 0
    }
}

impl AggregateRoot for Drum {
    type Id = DrumId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: place an OUT drum on a grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceDrum {
    pub drum_id: DrumId,
    pub grid_id: GridId,
    pub metadata: DrumMetadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: take a stored drum out of storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDrum {
    pub drum_id: DrumId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: move a stored drum to another grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDrum {
    pub drum_id: DrumId,
    pub to_grid: GridId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrumCommand {
    Place(PlaceDrum),
    Remove(RemoveDrum),
    Shift(ShiftDrum),
}

/// Event: DrumPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumPlaced {
    pub drum_id: DrumId,
    pub grid_id: GridId,
    pub metadata: DrumMetadata,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DrumRemoved. Carries the metadata as it was just before clearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumRemoved {
    pub drum_id: DrumId,
    pub grid_id: GridId,
    pub metadata: DrumMetadata,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DrumShifted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumShifted {
    pub drum_id: DrumId,
    pub from_grid: GridId,
    pub to_grid: GridId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrumEvent {
    Placed(DrumPlaced),
    Removed(DrumRemoved),
    Shifted(DrumShifted),
}

impl DrumEvent {
    pub fn kind(&self) -> TxnKind {
        match self {
            DrumEvent::Placed(_) => TxnKind::In,
            DrumEvent::Removed(_) => TxnKind::Out,
            DrumEvent::Shifted(_) => TxnKind::Shift,
        }
    }

    pub fn drum_id(&self) -> &DrumId {
        match self {
            DrumEvent::Placed(e) => &e.drum_id,
            DrumEvent::Removed(e) => &e.drum_id,
            DrumEvent::Shifted(e) => &e.drum_id,
        }
    }

    /// Grid written to the audit transaction (destination for shifts).
    pub fn recorded_grid(&self) -> &GridId {
        match self {
            DrumEvent::Placed(e) => &e.grid_id,
            DrumEvent::Removed(e) => &e.grid_id,
            DrumEvent::Shifted(e) => &e.to_grid,
        }
    }

    /// Grid that gains an occupant, if any.
    pub fn occupied_grid(&self) -> Option<&GridId> {
        match self {
            DrumEvent::Placed(e) => Some(&e.grid_id),
            DrumEvent::Removed(_) => None,
            DrumEvent::Shifted(e) => Some(&e.to_grid),
        }
    }

    /// Grid that loses an occupant, if any.
    pub fn vacated_grid(&self) -> Option<&GridId> {
        match self {
            DrumEvent::Placed(_) => None,
            DrumEvent::Removed(e) => Some(&e.grid_id),
            DrumEvent::Shifted(e) => Some(&e.from_grid),
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DrumEvent::Placed(e) => e.occurred_at,
            DrumEvent::Removed(e) => e.occurred_at,
            DrumEvent::Shifted(e) => e.occurred_at,
        }
    }

    /// History snapshot to archive; only removals produce one.
    pub fn history_snapshot(&self) -> Option<HistorySnapshot> {
        match self {
            DrumEvent::Removed(e) => Some(HistorySnapshot {
                drum_id: e.drum_id.clone(),
                metadata: e.metadata.clone(),
                grid_id: e.grid_id.clone(),
                taken_at: e.occurred_at,
            }),
            _ => None,
        }
    }
}

impl Aggregate for Drum {
    type Command = DrumCommand;
    type Event = DrumEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DrumEvent::Placed(e) => {
                self.state = DrumState::Stored {
                    grid: e.grid_id.clone(),
                    metadata: e.metadata.clone(),
                };
            }
            DrumEvent::Removed(_) => {
                self.state = DrumState::Out;
            }
            DrumEvent::Shifted(e) => {
                if let DrumState::Stored { grid, .. } = &mut self.state {
                    *grid = e.to_grid.clone();
                }
            }
        }

        self.last_updated = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DrumCommand::Place(cmd) => self.handle_place(cmd),
            DrumCommand::Remove(cmd) => self.handle_remove(cmd),
            DrumCommand::Shift(cmd) => self.handle_shift(cmd),
        }
    }
}

impl Drum {
    fn ensure_drum_id(&self, drum_id: &DrumId) -> DomainResult<()> {
        if &self.id != drum_id {
            return Err(DomainError::validation(format!(
                "command targets drum {drum_id}, aggregate is {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Current grid and metadata of a stored drum, or the matching error.
    fn stored(&self) -> DomainResult<(&GridId, &DrumMetadata)> {
        match &self.state {
            DrumState::Stored { grid, metadata } => Ok((grid, metadata)),
            DrumState::Out if !self.exists() => {
                Err(DomainError::not_found(format!("drum {}", self.id)))
            }
            DrumState::Out => Err(DomainError::invalid_state(format!(
                "drum {} is OUT",
                self.id
            ))),
        }
    }

    fn handle_place(&self, cmd: &PlaceDrum) -> DomainResult<Vec<DrumEvent>> {
        self.ensure_drum_id(&cmd.drum_id)?;
        cmd.metadata.validate()?;

        if let DrumState::Stored { grid, .. } = &self.state {
            return Err(DomainError::invalid_state(format!(
                "drum {} is already IN at grid {grid}",
                self.id
            )));
        }

        Ok(vec![DrumEvent::Placed(DrumPlaced {
            drum_id: cmd.drum_id.clone(),
            grid_id: cmd.grid_id.clone(),
            metadata: cmd.metadata.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveDrum) -> DomainResult<Vec<DrumEvent>> {
        self.ensure_drum_id(&cmd.drum_id)?;
        let (grid, metadata) = self.stored()?;

        Ok(vec![DrumEvent::Removed(DrumRemoved {
            drum_id: cmd.drum_id.clone(),
            grid_id: grid.clone(),
            metadata: metadata.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_shift(&self, cmd: &ShiftDrum) -> DomainResult<Vec<DrumEvent>> {
        self.ensure_drum_id(&cmd.drum_id)?;
        let (grid, _) = self.stored()?;

        if grid == &cmd.to_grid {
            return Err(DomainError::invalid_state(format!(
                "drum {} is already on grid {grid}",
                self.id
            )));
        }

        Ok(vec![DrumEvent::Shifted(DrumShifted {
            drum_id: cmd.drum_id.clone(),
            from_grid: grid.clone(),
            to_grid: cmd.to_grid.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
