//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic, business-level failures only (validation, state rules,
/// capacity). Races and storage faults belong to the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Required input was missing or malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown drum or grid id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not valid for the current status (e.g. removing an OUT drum).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The destination grid cannot accept another drum.
    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }
}
