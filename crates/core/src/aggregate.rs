//! Aggregate root trait for the ledger's state-transition models.

/// Aggregate root marker + minimal interface.
///
/// Kept small so the inventory crate decides how it models transitions
/// (pure functions, event application) without pulling in storage concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Version `0` means the aggregate has never been persisted.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a stored row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The row must not exist yet.
    Absent,
    /// Require the row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation matching an aggregate loaded at `version` (0 = never stored).
    pub fn of(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::Absent
        } else {
            ExpectedVersion::Exact(version)
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO. They only describe what happened.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_zero_is_absent() {
        assert_eq!(ExpectedVersion::of(0), ExpectedVersion::Absent);
        assert_eq!(ExpectedVersion::of(7), ExpectedVersion::Exact(7));
    }
}
