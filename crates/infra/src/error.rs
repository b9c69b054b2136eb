//! Ledger error model.
//!
//! `LedgerError` flattens deterministic domain failures and adds the two
//! infrastructure outcomes a caller must distinguish: a lost race
//! (`Conflict`, safe to retry) and a storage fault (`Storage`, the operation
//! was rolled back).
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLite result code | LedgerError |
//! |------------|--------------------|-------------|
//! | Database (busy / locked) | `SQLITE_BUSY` (5), `SQLITE_LOCKED` (6) and extended codes | `Conflict` |
//! | Database (unique violation) | `SQLITE_CONSTRAINT_UNIQUE` / `_PRIMARYKEY` | `Conflict` |
//! | Database (other) | any other | `Storage` |
//! | PoolTimedOut | N/A | `Conflict` |
//! | anything else | N/A | `Storage` |

use thiserror::Error;

use drumledger_core::DomainError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Missing or malformed input (blank id, missing metadata).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown drum or grid.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid for the drum's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Destination grid cannot take another drum.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// A concurrent write touched the same rows first; nothing was written.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Driver or IO fault; the operation was rolled back.
    #[error("storage failure during {operation}: {message}")]
    Storage { operation: String, message: String },
}

impl LedgerError {
    pub fn storage(operation: &str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::InvalidState(msg) => LedgerError::InvalidState(msg),
            DomainError::Capacity(msg) => LedgerError::Capacity(msg),
        }
    }
}

/// Map a SQLx error to a `LedgerError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            if db_err.is_unique_violation() {
                return LedgerError::Conflict(msg);
            }

            // Extended result codes carry the primary code in the low byte.
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);

            match primary {
                Some(5) | Some(6) => LedgerError::Conflict(msg),
                _ => LedgerError::storage(operation, msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::Conflict(format!("connection pool busy in {}", operation))
        }
        sqlx::Error::PoolClosed => LedgerError::storage(operation, "connection pool closed"),
        sqlx::Error::RowNotFound => LedgerError::storage(operation, "unexpected row not found"),
        other => LedgerError::storage(operation, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_category() {
        assert_eq!(
            LedgerError::from(DomainError::capacity("grid A1 is full")),
            LedgerError::Capacity("grid A1 is full".to_string())
        );
        assert!(matches!(
            LedgerError::from(DomainError::invalid_state("drum D001 is OUT")),
            LedgerError::InvalidState(_)
        ));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::Conflict("stale".into()).is_retryable());
        assert!(!LedgerError::storage("commit", "disk full").is_retryable());
        assert!(!LedgerError::NotFound("drum D001".into()).is_retryable());
    }

    #[test]
    fn pool_timeout_maps_to_conflict() {
        let err = map_sqlx_error("begin", sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        let err = map_sqlx_error("begin", sqlx::Error::PoolClosed);
        assert!(matches!(err, LedgerError::Storage { .. }));
    }
}
