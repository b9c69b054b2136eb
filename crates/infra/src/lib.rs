//! Infrastructure layer: SQLite store, transition engine, queries, admin.
//!
//! The inventory crate decides *what* a transition does; this crate makes it
//! durable and atomic. Callers normally open a [`Ledger`] and work through its
//! [`TransitionEngine`], [`QueryLayer`] and [`Administration`] handles.

pub mod admin;
mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod query;
pub mod store;

pub use admin::{Administration, ArmedReset, ResetSummary};
pub use config::LedgerConfig;
pub use engine::{BatchOutcome, BatchReport, TransitionEngine};
pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use query::{GridOccupancy, InvariantViolation, QueryLayer, SearchHit};
pub use store::InventoryStore;
