//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Grids are entities: a grid keeps its identity while its status flips
/// between available and occupied.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
