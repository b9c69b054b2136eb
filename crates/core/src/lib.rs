//! `drumledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no storage concerns):
//! identifiers, the domain error model and the aggregate/entity traits the
//! inventory crate builds on.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{DrumId, GridId};
