//! Audit record types: the append-only transaction stream and removal
//! history snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drumledger_core::{DomainError, DrumId, GridId};

use crate::drum::DrumMetadata;

/// Kind of drum movement recorded in the transaction stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnKind {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
    #[serde(rename = "SHIFT")]
    Shift,
}

impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnKind::In => "IN",
            TxnKind::Out => "OUT",
            TxnKind::Shift => "SHIFT",
        }
    }
}

impl core::fmt::Display for TxnKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TxnKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(TxnKind::In),
            "OUT" => Ok(TxnKind::Out),
            "SHIFT" => Ok(TxnKind::Shift),
            other => Err(DomainError::validation(format!("invalid transaction status: {other}"))),
        }
    }
}

/// Transaction id assigned by the store; strictly increasing, never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(pub i64);

/// History snapshot id assigned by the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistId(pub i64);

impl core::fmt::Display for TxnId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One committed IN/OUT/SHIFT event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_id: TxnId,
    pub drum_id: DrumId,
    pub grid_id: GridId,
    pub kind: TxnKind,
    pub timestamp: DateTime<Utc>,
}

/// Metadata captured at removal time, not yet assigned a `HistId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub drum_id: DrumId,
    pub metadata: DrumMetadata,
    pub grid_id: GridId,
    pub taken_at: DateTime<Utc>,
}

/// A stored removal snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub hist_id: HistId,
    pub drum_id: DrumId,
    pub metadata: DrumMetadata,
    /// Grid the drum vacated.
    pub grid_id: GridId,
    pub timestamp: DateTime<Utc>,
}
