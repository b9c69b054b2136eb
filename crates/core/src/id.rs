//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers arrive as free text from scanners and operators. They are
//! normalized (trimmed, uppercased) exactly once, here, so that `" d001 "`
//! and `"D001"` name the same drum everywhere downstream.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a physical drum (e.g. `D001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrumId(String);

/// Identifier of a storage grid slot (row letter + column number, e.g. `B2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridId(String);

fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

macro_rules! impl_text_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Normalize and validate a raw identifier.
            ///
            /// Fails with `DomainError::Validation` if nothing is left after trimming.
            pub fn parse(raw: &str) -> Result<Self, DomainError> {
                let value = normalize(raw);
                if value.is_empty() {
                    return Err(DomainError::validation(concat!($name, " cannot be empty")));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }
    };
}

impl_text_id!(DrumId, "DrumId");
impl_text_id!(GridId, "GridId");

impl GridId {
    /// Grid id for a row letter and 1-based column number.
    pub fn at(row: char, column: u8) -> Self {
        Self(format!("{}{}", row.to_ascii_uppercase(), column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn drum_id_is_trimmed_and_uppercased() {
        let id = DrumId::parse("  d001\n").unwrap();
        assert_eq!(id.as_str(), "D001");
        assert_eq!(id, "D001".parse::<DrumId>().unwrap());
    }

    #[test]
    fn blank_ids_are_rejected() {
        let err = DrumId::parse("   ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(GridId::parse("").is_err());
    }

    #[test]
    fn grid_id_at_formats_row_and_column() {
        assert_eq!(GridId::at('b', 2).as_str(), "B2");
        assert_eq!(GridId::at('C', 3), GridId::parse("c3").unwrap());
    }

    proptest! {
        /// Property: normalization is idempotent.
        #[test]
        fn parse_is_idempotent(raw in "[ a-zA-Z0-9]{1,12}") {
            if let Ok(id) = DrumId::parse(&raw) {
                let again = DrumId::parse(id.as_str()).unwrap();
                prop_assert_eq!(id, again);
            }
        }
    }
}
